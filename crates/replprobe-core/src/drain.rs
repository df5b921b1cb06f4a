//! Waiting for, and capturing, the child's stdout.
//!
//! The default [`DrainStrategy::Grace`] keeps the classic contract: sleep a
//! fixed delay, block until at least one byte is available, then take one
//! bounded read. The other strategies read repeatedly until a marker or
//! end-of-stream is seen. Every wait is bounded by the configured drain
//! timeout unless it has been explicitly disabled.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::ChildStdout;
use tracing::{debug, warn};

use crate::config::{AvailabilityWait, DrainStrategy, HarnessConfig};
use crate::error::HarnessError;

/// Bytes captured from stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Stdout reached end-of-stream during the capture.
    pub closed: bool,
}

/// Capture the child's output according to `config.drain`.
pub async fn capture(stdout: ChildStdout, config: &HarnessConfig) -> Result<Captured, HarnessError> {
    match &config.drain {
        DrainStrategy::Grace { wait } => {
            if !config.initial_drain_delay.is_zero() {
                debug!(
                    delay_ms = config.initial_drain_delay.as_millis() as u64,
                    "waiting for child to process commands"
                );
                tokio::time::sleep(config.initial_drain_delay).await;
            }
            match wait {
                AvailabilityWait::Blocking => {
                    let mut reader = BufReader::with_capacity(config.buffer_capacity, stdout);
                    capture_first_read(&mut reader, config.buffer_capacity, config.drain_timeout)
                        .await
                }
                AvailabilityWait::Poll { interval } => {
                    capture_polled(stdout, config.buffer_capacity, *interval, config.drain_timeout)
                        .await
                }
            }
        }
        DrainStrategy::Sentinel(marker) => {
            let mut stdout = stdout;
            read_until(
                &mut stdout,
                config.buffer_capacity,
                Some(marker.as_bytes()),
                config.drain_timeout,
            )
            .await
        }
        DrainStrategy::Eof => {
            let mut stdout = stdout;
            read_until(&mut stdout, config.buffer_capacity, None, config.drain_timeout).await
        }
    }
}

/// Block until the reader has data (or is closed), then take what the one
/// underlying read produced, at most `capacity` bytes.
pub async fn capture_first_read<R>(
    reader: &mut BufReader<R>,
    capacity: usize,
    timeout: Option<Duration>,
) -> Result<Captured, HarnessError>
where
    R: AsyncRead + Unpin,
{
    let available = bounded(timeout, async {
        reader
            .fill_buf()
            .await
            .map(|buf| buf.len())
            .map_err(|source| HarnessError::Read { source })
    })
    .await??;

    if available == 0 {
        debug!("child stdout closed without producing output");
        return Ok(Captured {
            bytes: Vec::new(),
            closed: true,
        });
    }

    let take = available.min(capacity);
    let bytes = reader.buffer()[..take].to_vec();
    reader.consume(take);
    debug!(available, captured = take, "captured child output");

    Ok(Captured {
        bytes,
        closed: false,
    })
}

/// Read repeatedly into a `capacity`-byte buffer until `marker` appears in
/// the captured bytes, the reader reaches end-of-stream, or the buffer is
/// full. With no marker, only the last two conditions apply.
pub async fn read_until<R>(
    reader: &mut R,
    capacity: usize,
    marker: Option<&[u8]>,
    timeout: Option<Duration>,
) -> Result<Captured, HarnessError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; capacity];
    let mut filled = 0;

    let closed = bounded(timeout, async {
        loop {
            if filled == capacity {
                debug!(capacity, "capture buffer full");
                return Ok(false);
            }
            let n = match reader.read(&mut buf[filled..]).await {
                Ok(n) => n,
                Err(source) => return Err(HarnessError::Read { source }),
            };
            if n == 0 {
                return Ok(true);
            }
            let search_from =
                filled.saturating_sub(marker.map_or(0, |m| m.len().saturating_sub(1)));
            filled += n;
            if let Some(marker) = marker {
                if contains(&buf[search_from..filled], marker) {
                    debug!(bytes = filled, "sentinel seen in child output");
                    return Ok(false);
                }
            }
        }
    })
    .await??;

    buf.truncate(filled);
    Ok(Captured { bytes: buf, closed })
}

/// Busy-poll the number of buffered bytes on the pipe until it is non-zero,
/// then read at most that many bytes in one call. A pipe that is readable
/// with nothing buffered has been closed by the child.
#[cfg(unix)]
async fn capture_polled(
    mut stdout: ChildStdout,
    capacity: usize,
    interval: Duration,
    timeout: Option<Duration>,
) -> Result<Captured, HarnessError> {
    use std::os::fd::AsRawFd;

    let fd = stdout.as_raw_fd();
    let available = bounded(timeout, async {
        loop {
            // Readiness first: bytes that land in between show up in the count.
            let readable = match pipe_readable(fd) {
                Ok(readable) => readable,
                Err(source) => return Err(HarnessError::Read { source }),
            };
            let n = match bytes_available(fd) {
                Ok(n) => n,
                Err(source) => return Err(HarnessError::Read { source }),
            };
            if n > 0 {
                return Ok(Some(n));
            }
            if readable {
                return Ok(None);
            }
            if interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(interval).await;
            }
        }
    })
    .await??;

    let Some(available) = available else {
        debug!("child stdout closed without producing output");
        return Ok(Captured {
            bytes: Vec::new(),
            closed: true,
        });
    };

    let mut buf = vec![0u8; available.min(capacity)];
    let n = stdout
        .read(&mut buf)
        .await
        .map_err(|source| HarnessError::Read { source })?;
    buf.truncate(n);
    debug!(available, captured = n, "captured child output after polling");

    Ok(Captured {
        bytes: buf,
        closed: n == 0,
    })
}

#[cfg(not(unix))]
async fn capture_polled(
    stdout: ChildStdout,
    capacity: usize,
    _interval: Duration,
    timeout: Option<Duration>,
) -> Result<Captured, HarnessError> {
    warn!("availability polling is only supported on unix, using a blocking wait");
    let mut reader = BufReader::with_capacity(capacity, stdout);
    capture_first_read(&mut reader, capacity, timeout).await
}

/// Number of bytes that can be read from `fd` without blocking.
#[cfg(unix)]
fn bytes_available(fd: std::os::fd::RawFd) -> std::io::Result<usize> {
    let mut n: libc::c_int = 0;
    // SAFETY: FIONREAD writes a single c_int through the provided pointer.
    let ret = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut n as *mut libc::c_int) };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(usize::try_from(n).unwrap_or(0))
}

/// Whether a read on `fd` would return immediately, either with data or at
/// end-of-stream.
#[cfg(unix)]
fn pipe_readable(fd: std::os::fd::RawFd) -> std::io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd, zero timeout.
    let ret = unsafe { libc::poll(&mut pfd, 1, 0) };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(ret > 0 && pfd.revents & (libc::POLLIN | libc::POLLHUP) != 0)
}

/// Run `fut`, failing with [`HarnessError::DrainTimeout`] if `timeout`
/// elapses first.
async fn bounded<F, T>(timeout: Option<Duration>, fut: F) -> Result<T, HarnessError>
where
    F: Future<Output = T>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            warn!(timeout_ms = limit.as_millis() as u64, "timed out waiting for child output");
            HarnessError::DrainTimeout { waited: limit }
        }),
        None => Ok(fut.await),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
