//! Graphics error types.

use std::fmt;

use framegraph_core::pool::PoolError;

use crate::descriptor::DescriptorHeapKind;

/// Errors that can occur in the graphics system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// A descriptor heap is full.
    OutOfDescriptors(DescriptorHeapKind),
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// An operation was called in the wrong state.
    InvalidState(String),
    /// A handle did not resolve to a live object.
    InvalidHandle(PoolError),
    /// Render graph declaration or compilation failed.
    Graph(GraphError),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::OutOfDescriptors(kind) => write!(f, "out of {kind:?} descriptors"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::InvalidHandle(err) => write!(f, "invalid handle: {err}"),
            Self::Graph(err) => write!(f, "render graph: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidHandle(err) => Some(err),
            Self::Graph(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PoolError> for GraphicsError {
    fn from(err: PoolError) -> Self {
        Self::InvalidHandle(err)
    }
}

impl From<GraphError> for GraphicsError {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

/// Errors raised while declaring or compiling a render graph.
///
/// Resource and view ids are graph-local indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The graph is not in a state that allows the operation.
    InvalidState(String),
    /// A graph resource id does not exist in this compilation.
    InvalidResource(u32),
    /// A graph view id does not exist in this compilation.
    InvalidView(u32),
    /// A buffer-only or texture-only operation got the other kind.
    WrongResourceType {
        /// Graph resource id.
        resource: u32,
        /// Kind the operation needs.
        expected: &'static str,
    },
    /// A mip index is outside the resource's mip chain.
    MipOutOfRange {
        /// Graph resource id.
        resource: u32,
        /// Requested mip.
        mip: u32,
        /// Mips available.
        mip_levels: u32,
    },
    /// A pass declared a second depth target.
    DuplicateDepthTarget(String),
    /// The operation is not valid for this pass kind.
    WrongPassKind(String),
    /// A pass reads and writes the same subresource.
    ReadWriteHazard {
        /// Offending pass.
        pass: String,
        /// Graph resource id.
        resource: u32,
    },
    /// Two writes to one subresource without a read in between.
    WriteAfterWrite {
        /// Earlier writer.
        first: String,
        /// Later writer.
        second: String,
        /// Graph resource id.
        resource: u32,
    },
    /// `pass_data` was asked for the wrong type.
    PassDataMismatch(usize),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::InvalidResource(id) => write!(f, "unknown graph resource {id}"),
            Self::InvalidView(id) => write!(f, "unknown graph view {id}"),
            Self::WrongResourceType { resource, expected } => {
                write!(f, "graph resource {resource} is not a {expected}")
            }
            Self::MipOutOfRange {
                resource,
                mip,
                mip_levels,
            } => write!(
                f,
                "mip {mip} out of range for graph resource {resource} ({mip_levels} mips)"
            ),
            Self::DuplicateDepthTarget(pass) => {
                write!(f, "pass '{pass}' declares more than one depth target")
            }
            Self::WrongPassKind(msg) => write!(f, "wrong pass kind: {msg}"),
            Self::ReadWriteHazard { pass, resource } => write!(
                f,
                "pass '{pass}' reads and writes graph resource {resource}"
            ),
            Self::WriteAfterWrite {
                first,
                second,
                resource,
            } => write!(
                f,
                "pass '{second}' overwrites graph resource {resource} written by '{first}' without a read in between"
            ),
            Self::PassDataMismatch(index) => {
                write!(f, "pass {index} data has a different type")
            }
        }
    }
}

impl std::error::Error for GraphError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");

        let err = GraphicsError::OutOfDescriptors(DescriptorHeapKind::RenderTarget);
        assert_eq!(err.to_string(), "out of RenderTarget descriptors");
    }

    #[test]
    fn test_from_pool_error() {
        let err: GraphicsError = PoolError::OutOfRange { index: 4, len: 1 }.into();
        assert!(matches!(err, GraphicsError::InvalidHandle(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_graph_error_display() {
        let err: GraphicsError = GraphError::WriteAfterWrite {
            first: "a".into(),
            second: "b".into(),
            resource: 0,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "render graph: pass 'b' overwrites graph resource 0 written by 'a' without a read in between"
        );
    }
}
