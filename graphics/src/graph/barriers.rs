//! Conflict detection and barrier placement.
//!
//! Both run over the same per-subresource access lists: every view that
//! covers a mip contributes one access for its pass, and accesses of the same
//! pass are merged. Views are appended while passes register, so walking them
//! in index order walks passes in registration order.
//!
//! Barrier placement is a single forward pass per subresource:
//!
//! ```text
//! pass:    0        1        2        3
//! access:  write    read     read     write
//! segment: [UAV]    [SRV  |  INDIRECT] [UAV]
//! barrier:        ^UAV->SRV|IND     ^SRV|IND->UAV
//! ```
//!
//! Consecutive reads form one segment whose state is the union of their read
//! states, so a run of readers needs a single transition at its first pass.
//! A write that follows a write in the same state (back to back attachment
//! passes, or a shader write to an imported resource resting in
//! `UNORDERED_ACCESS`) still gets a `before == after` barrier so the first
//! write lands before the second starts.

use crate::error::GraphError;
use crate::types::{ResourceState, Subresource};

use super::resource::{GraphResource, GraphResourceId, GraphResourceView, ViewAccess};

/// Where a barrier is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum BarrierLocation {
    /// Before the pass with this index.
    Entry(usize),
    /// After the last pass.
    Final,
}

/// A transition in graph-local terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GraphBarrier {
    pub resource: GraphResourceId,
    pub subresource: Subresource,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Output of barrier placement.
#[derive(Debug, Default)]
pub(crate) struct BarrierPlan {
    /// State each resource is in before the first pass (graph-owned
    /// resources are created in it).
    pub start_states: Vec<ResourceState>,
    pub entry: Vec<Vec<GraphBarrier>>,
    pub final_barriers: Vec<GraphBarrier>,
}

/// Merged accesses of one pass to one subresource.
#[derive(Debug, Clone, Copy)]
struct PassAccess {
    pass: usize,
    read: Option<ResourceState>,
    write: Option<(ResourceState, bool)>,
}

/// Indices of the views of every resource.
fn views_by_resource(resource_count: usize, views: &[GraphResourceView]) -> Vec<Vec<usize>> {
    let mut buckets = vec![Vec::new(); resource_count];
    for (index, view) in views.iter().enumerate() {
        if let Some(bucket) = buckets.get_mut(view.resource.0 as usize) {
            bucket.push(index);
        }
    }
    buckets
}

fn pass_accesses(views: &[GraphResourceView], indices: &[usize], mip: u32) -> Vec<PassAccess> {
    let mut accesses: Vec<PassAccess> = Vec::new();
    for view in indices.iter().map(|&i| &views[i]).filter(|v| v.covers(mip)) {
        if accesses.last().is_none_or(|last| last.pass != view.pass) {
            accesses.push(PassAccess {
                pass: view.pass,
                read: None,
                write: None,
            });
        }
        let Some(access) = accesses.last_mut() else {
            continue;
        };
        match view.access {
            ViewAccess::Read => {
                access.read = Some(access.read.unwrap_or(ResourceState::COMMON) | view.state);
            }
            ViewAccess::Write | ViewAccess::Attachment => {
                let exclusive = view.access == ViewAccess::Write;
                access.write = Some(match access.write {
                    Some((state, was_exclusive)) => (state, was_exclusive || exclusive),
                    None => (view.state, exclusive),
                });
            }
        }
    }
    accesses
}

/// Reject hazardous declarations.
///
/// - a pass reading and writing the same subresource;
/// - an exclusive write after an unread write, or any write after an unread
///   exclusive write.
///
/// Consecutive attachment writes are allowed.
pub(crate) fn validate(
    pass_names: &[&str],
    resources: &[GraphResource],
    views: &[GraphResourceView],
) -> Result<(), GraphError> {
    let buckets = views_by_resource(resources.len(), views);
    for (id, resource) in resources.iter().enumerate() {
        for mip in 0..resource.desc.subresource_count() {
            let mut last_write: Option<(usize, bool)> = None;
            for access in pass_accesses(views, &buckets[id], mip) {
                if access.read.is_some() && access.write.is_some() {
                    return Err(GraphError::ReadWriteHazard {
                        pass: pass_names[access.pass].to_string(),
                        resource: id as u32,
                    });
                }
                if access.read.is_some() {
                    last_write = None;
                }
                if let Some((_, exclusive)) = access.write {
                    if let Some((previous, previous_exclusive)) = last_write
                        && (exclusive || previous_exclusive)
                    {
                        return Err(GraphError::WriteAfterWrite {
                            first: pass_names[previous].to_string(),
                            second: pass_names[access.pass].to_string(),
                            resource: id as u32,
                        });
                    }
                    last_write = Some((access.pass, exclusive));
                }
            }
        }
    }
    Ok(())
}

/// `(pass, state)` runs of one subresource: writes stand alone, consecutive
/// reads merge.
fn segments(accesses: &[PassAccess]) -> Vec<(usize, ResourceState, bool)> {
    let mut segments: Vec<(usize, ResourceState, bool)> = Vec::new();
    for access in accesses {
        if let Some((state, _)) = access.write {
            segments.push((access.pass, state, false));
        } else if let Some(state) = access.read {
            match segments.last_mut() {
                Some((_, run, true)) => *run |= state,
                _ => segments.push((access.pass, state, true)),
            }
        }
    }
    segments
}

/// Place the minimal set of transitions.
///
/// Imported resources start (and end) in their resting state. Graph-owned
/// resources start in the state of their earliest use, so the first pass
/// needs no barrier, and are returned to it after the last pass so the next
/// execution starts from the same state.
pub(crate) fn plan(
    pass_count: usize,
    resources: &[GraphResource],
    views: &[GraphResourceView],
) -> BarrierPlan {
    let buckets = views_by_resource(resources.len(), views);
    let mut plan = BarrierPlan {
        start_states: Vec::with_capacity(resources.len()),
        entry: vec![Vec::new(); pass_count],
        final_barriers: Vec::new(),
    };

    for (id, resource) in resources.iter().enumerate() {
        let subresources = resource.desc.subresource_count();
        let per_mip: Vec<_> = (0..subresources)
            .map(|mip| segments(&pass_accesses(views, &buckets[id], mip)))
            .collect();

        let start = if resource.is_imported() {
            resource.imported_state
        } else {
            per_mip
                .iter()
                .filter_map(|segs| segs.first())
                .min_by_key(|(pass, _, _)| *pass)
                .map(|(_, state, _)| *state)
                .unwrap_or_else(|| resource.desc.default_state())
        };
        plan.start_states.push(start);

        // (location, before, after) -> mips, in first-occurrence order.
        type Key = (BarrierLocation, ResourceState, ResourceState);
        let mut groups: Vec<(Key, Vec<u32>)> = Vec::new();
        let mut add = |key: Key, mip: u32| match groups.iter().position(|(k, _)| *k == key) {
            Some(index) => groups[index].1.push(mip),
            None => groups.push((key, vec![mip])),
        };
        for (mip, segs) in per_mip.iter().enumerate() {
            let mut current = start;
            // Imported resources may have been written before the graph runs.
            let mut after_write = resource.is_imported() && !start.is_read_only();
            for &(pass, state, is_read) in segs {
                if state != current {
                    add((BarrierLocation::Entry(pass), current, state), mip as u32);
                    current = state;
                } else if !is_read && after_write {
                    add((BarrierLocation::Entry(pass), state, state), mip as u32);
                }
                after_write = !is_read;
            }
            if current != start {
                add((BarrierLocation::Final, current, start), mip as u32);
            }
        }

        let resource_id = GraphResourceId(id as u32);
        for ((location, before, after), mips) in groups {
            let subresource_list: Vec<Subresource> = if mips.len() as u32 == subresources {
                vec![Subresource::All]
            } else {
                mips.into_iter().map(Subresource::Mip).collect()
            };
            for subresource in subresource_list {
                let barrier = GraphBarrier {
                    resource: resource_id,
                    subresource,
                    before,
                    after,
                };
                match location {
                    BarrierLocation::Entry(pass) => plan.entry[pass].push(barrier),
                    BarrierLocation::Final => plan.final_barriers.push(barrier),
                }
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceDescriptor, TextureDescriptor, TextureFormat, TextureUsage};

    fn texture(mips: u32) -> GraphResource {
        GraphResource {
            name: "t".into(),
            desc: ResourceDescriptor::Texture(
                TextureDescriptor::new_2d(
                    64,
                    64,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::ShaderReadWrite,
                )
                .with_mips(mips),
            ),
            imported: None,
            imported_state: ResourceState::UNORDERED_ACCESS,
            pass: 0,
            handle: None,
        }
    }

    fn view(pass: usize, access: ViewAccess, subresource: Subresource) -> GraphResourceView {
        let state = match access {
            ViewAccess::Read => ResourceState::ALL_SHADER_RESOURCE,
            ViewAccess::Write => ResourceState::UNORDERED_ACCESS,
            ViewAccess::Attachment => ResourceState::RENDER_TARGET,
        };
        GraphResourceView {
            resource: GraphResourceId(0),
            pass,
            access,
            subresource,
            state,
            desc: texture(1).desc,
            handle: None,
        }
    }

    #[test]
    fn test_read_run_needs_one_barrier() {
        let resources = [texture(1)];
        let views = [
            view(0, ViewAccess::Write, Subresource::All),
            view(1, ViewAccess::Read, Subresource::All),
            view(2, ViewAccess::Read, Subresource::All),
        ];
        validate(&["a", "b", "c"], &resources, &views).unwrap();
        let plan = plan(3, &resources, &views);

        assert_eq!(plan.start_states, vec![ResourceState::UNORDERED_ACCESS]);
        assert!(plan.entry[0].is_empty());
        assert_eq!(plan.entry[1].len(), 1);
        assert!(plan.entry[2].is_empty());
        assert_eq!(plan.final_barriers.len(), 1);
        assert_eq!(plan.final_barriers[0].after, ResourceState::UNORDERED_ACCESS);
    }

    #[test]
    fn test_mip_chain_barriers() {
        // Downsample chain: pass i reads mip i and writes mip i + 1.
        let resources = [texture(3)];
        let views = [
            view(0, ViewAccess::Write, Subresource::Mip(0)),
            view(1, ViewAccess::Read, Subresource::Mip(0)),
            view(1, ViewAccess::Write, Subresource::Mip(1)),
            view(2, ViewAccess::Read, Subresource::Mip(1)),
            view(2, ViewAccess::Write, Subresource::Mip(2)),
        ];
        validate(&["init", "down0", "down1"], &resources, &views).unwrap();
        let plan = plan(3, &resources, &views);

        assert_eq!(
            plan.entry[1],
            vec![GraphBarrier {
                resource: GraphResourceId(0),
                subresource: Subresource::Mip(0),
                before: ResourceState::UNORDERED_ACCESS,
                after: ResourceState::ALL_SHADER_RESOURCE,
            }]
        );
        assert_eq!(plan.entry[2].len(), 1);
        assert_eq!(plan.entry[2][0].subresource, Subresource::Mip(1));
        // Mips 0 and 1 end up readable; mip 2 never left UAV.
        assert_eq!(plan.final_barriers.len(), 2);
    }

    #[test]
    fn test_whole_resource_merge() {
        let resources = [texture(2)];
        let views = [
            view(0, ViewAccess::Write, Subresource::All),
            view(1, ViewAccess::Read, Subresource::All),
        ];
        let plan = plan(2, &resources, &views);
        assert_eq!(plan.entry[1].len(), 1);
        assert_eq!(plan.entry[1][0].subresource, Subresource::All);
    }

    #[test]
    fn test_conflicts() {
        let resources = [texture(1)];
        let hazard = [
            view(0, ViewAccess::Read, Subresource::All),
            view(0, ViewAccess::Write, Subresource::All),
        ];
        assert!(matches!(
            validate(&["a"], &resources, &hazard),
            Err(GraphError::ReadWriteHazard { .. })
        ));

        let write_write = [
            view(0, ViewAccess::Write, Subresource::All),
            view(1, ViewAccess::Write, Subresource::All),
        ];
        assert_eq!(
            validate(&["a", "b"], &resources, &write_write),
            Err(GraphError::WriteAfterWrite {
                first: "a".into(),
                second: "b".into(),
                resource: 0,
            })
        );

        let attachments = [
            view(0, ViewAccess::Attachment, Subresource::All),
            view(1, ViewAccess::Attachment, Subresource::All),
        ];
        assert!(validate(&["a", "b"], &resources, &attachments).is_ok());

        let separated = [
            view(0, ViewAccess::Write, Subresource::All),
            view(1, ViewAccess::Read, Subresource::All),
            view(2, ViewAccess::Write, Subresource::All),
        ];
        assert!(validate(&["a", "b", "c"], &resources, &separated).is_ok());
    }

    #[test]
    fn test_write_after_write_in_same_state() {
        let resources = [texture(1)];
        let views = [
            view(0, ViewAccess::Attachment, Subresource::All),
            view(1, ViewAccess::Attachment, Subresource::All),
        ];
        validate(&["a", "b"], &resources, &views).unwrap();
        let plan = plan(2, &resources, &views);

        assert_eq!(plan.start_states, vec![ResourceState::RENDER_TARGET]);
        assert!(plan.entry[0].is_empty());
        assert_eq!(
            plan.entry[1],
            vec![GraphBarrier {
                resource: GraphResourceId(0),
                subresource: Subresource::All,
                before: ResourceState::RENDER_TARGET,
                after: ResourceState::RENDER_TARGET,
            }]
        );
        assert!(plan.final_barriers.is_empty());
    }

    #[test]
    fn test_imported_write_state_orders_first_write() {
        let mut resource = texture(2);
        resource.imported = Some(crate::device::ResourceId::Texture(
            framegraph_core::pool::Handle::from_raw_parts(0, 0),
        ));
        let views = [view(0, ViewAccess::Write, Subresource::All)];
        let plan = plan(1, &[resource], &views);

        assert_eq!(plan.entry[0].len(), 1);
        assert_eq!(plan.entry[0][0].before, ResourceState::UNORDERED_ACCESS);
        assert_eq!(plan.entry[0][0].after, ResourceState::UNORDERED_ACCESS);
        assert!(plan.final_barriers.is_empty());

        // Graph-owned resources start in their first write state.
        let plan = super::plan(1, &[texture(2)], &views);
        assert!(plan.entry[0].is_empty());
    }

    #[test]
    fn test_imported_resource_starts_at_resting_state() {
        let mut resource = texture(1);
        resource.imported = Some(crate::device::ResourceId::Texture(
            framegraph_core::pool::Handle::from_raw_parts(0, 0),
        ));
        resource.imported_state = ResourceState::ALL_SHADER_RESOURCE;
        let views = [view(0, ViewAccess::Write, Subresource::All)];
        let plan = plan(1, &[resource], &views);

        assert_eq!(plan.entry[0].len(), 1);
        assert_eq!(plan.entry[0][0].before, ResourceState::ALL_SHADER_RESOURCE);
        assert_eq!(plan.final_barriers[0].after, ResourceState::ALL_SHADER_RESOURCE);
    }
}
