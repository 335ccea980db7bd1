mod progress;
mod request;
mod state;

pub use progress::{ProgressUpdate, TransferProgress};
pub use request::{TransferDirection, TransferRequest};
pub use state::{ErrorInfo, ErrorKind, TransferState, TransferSummary};

use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

pub type BoxedAsyncRead<'a> = Pin<Box<dyn AsyncRead + Send + 'a>>;
pub type BoxedAsyncWrite<'a> = Pin<Box<dyn AsyncWrite + Send + 'a>>;
