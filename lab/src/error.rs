use thiserror::Error;

/// Terminal outcome of a single remote operation or stage.
#[derive(Debug, Error)]
pub enum LabError {
    /// Structured error returned by a remote daemon. Fatal to the unit of
    /// work that issued it; siblings keep running.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The peer already has a channel open in flight with us. Transient;
    /// the funding protocol retries it with a fixed delay.
    #[error("channel open already in progress with peer {peer}")]
    ChannelOpenInProgress { peer: String },

    /// The operation was cancelled by an external shutdown signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Container-runtime failure while managing an instance.
    #[error("container runtime: {0}")]
    Runtime(String),

    /// A dependency of this operation never became available, e.g. the
    /// node-start task this funding task waited on failed.
    #[error("{0} is not available")]
    Unavailable(String),

    /// The node has not completed first RPC contact, so no public key is
    /// known yet.
    #[error("node {0} has no public key yet")]
    NoPublicKey(String),

    /// A task panicked; carries the panic message.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Every task of the named stage failed and the lab is configured to
    /// treat that as fatal.
    #[error("every task of stage {0} failed")]
    StageFailed(&'static str),
}

impl LabError {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        LabError::Rpc {
            code,
            message: message.into(),
        }
    }

    pub fn is_transient_conflict(&self) -> bool {
        matches!(self, LabError::ChannelOpenInProgress { .. })
    }
}
