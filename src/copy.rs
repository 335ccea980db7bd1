use anyhow::Context;
use async_stream::try_stream;
use futures::Stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Result, TransferError},
    store::Store,
};

pub fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(TransferError::Cancelled)
    } else {
        Ok(())
    }
}

/// Copies `src` on `source` to `dst` on `dest`, yielding the size of every
/// chunk written.
///
/// Cancellation is checked before the destination is opened and before each
/// chunk is written, never after the last one: a file whose final chunk made
/// it out completes normally.
pub fn copy_file<'a>(
    source: &'a dyn Store,
    src: &'a str,
    dest: &'a dyn Store,
    dst: &'a str,
    chunk_size: usize,
    cancel: &'a CancellationToken,
) -> impl Stream<Item = Result<u64>> + 'a {
    try_stream! {
        ensure_active(cancel)?;

        let mut reader = source
            .read(src)
            .await
            .map_err(|e| TransferError::from_store(src, e))?;

        ensure_active(cancel)?;

        let mut writer = dest
            .write(dst)
            .await
            .map_err(|e| TransferError::from_store(dst, e))?;

        let mut buf = vec![0u8; chunk_size.max(1)];

        loop {
            let bytes = reader
                .read(&mut buf)
                .await
                .with_context(|| format!("Error while reading file {}", src))
                .map_err(|e| TransferError::from_store(src, e))?;

            if bytes == 0 {
                break;
            }

            ensure_active(cancel)?;

            writer
                .write_all(&buf[..bytes])
                .await
                .with_context(|| format!("Error while writing to file {}", dst))
                .map_err(|e| TransferError::from_store(dst, e))?;

            yield bytes as u64;
        }

        writer
            .shutdown()
            .await
            .with_context(|| format!("Error while finishing file {}", dst))
            .map_err(|e| TransferError::from_store(dst, e))?;
    }
}
