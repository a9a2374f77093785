//! Internal macros for sync/async code unification.
//!
//! [`TlsStream`](crate::stream::TlsStream) and
//! [`AsyncTlsStream`](crate::stream_async::AsyncTlsStream) drive the same
//! sans-IO [`ClientConnection`](crate::connection::ClientConnection). The only
//! differences between them are:
//! - `fn` vs `async fn` signatures
//! - `.await` after I/O calls
//! - `Read + Write` vs `AsyncRead + AsyncWrite + Unpin` trait bounds
//! - how a stalled negotiation waits (sleep vs yield)
//!
//! Each I/O method body is captured in a macro that accepts a `$mode` parameter
//! (`sync` or `is_async`) and uses `maybe_await!` to conditionally `.await`.
//! The expanding type must have `stream` and `conn` fields and a `wait`
//! method.

/// Conditionally `.await` an expression based on sync/async mode.
///
/// - `maybe_await!(sync, expr)` expands to `expr`
/// - `maybe_await!(is_async, expr)` expands to `expr.await`
macro_rules! maybe_await {
    (sync, $e:expr) => {
        $e
    };
    (is_async, $e:expr) => {
        $e.await
    };
}

/// Largest chunk read from the transport at once: one full record.
pub(crate) const TRANSPORT_READ_CHUNK: usize = 5 + 16384 + 2048;

/// Body for `flush_tls`: run every pending handshake step and write out
/// whatever ciphertext the connection produced.
macro_rules! flush_tls_body {
    ($mode:ident, $self:ident) => {{
        while $self.conn.tx_step(usize::MAX)? {}
        if $self.conn.has_ciphertext() {
            let out = $self.conn.take_ciphertext();
            let mut written = maybe_await!($mode, $self.stream.write_all(&out));
            if written.is_ok() {
                written = maybe_await!($mode, $self.stream.flush());
            }
            if let Err(e) = written {
                let err = TlsError::IoError(e);
                $self.conn.close(err.clone());
                return Err(err);
            }
        }
        Ok(())
    }};
}

/// Body for `read_tls`: read one chunk from the transport and feed it to
/// the connection. End of stream closes the connection unless the peer
/// already sent close_notify.
macro_rules! read_tls_body {
    ($mode:ident, $self:ident) => {{
        let mut tmp = [0u8; $crate::macros::TRANSPORT_READ_CHUNK];
        let n = match maybe_await!($mode, $self.stream.read(&mut tmp)) {
            Ok(n) => n,
            Err(e) => {
                let err = TlsError::IoError(e);
                $self.conn.close(err.clone());
                return Err(err);
            }
        };
        if n == 0 {
            if !$self.conn.is_peer_closed() {
                log::debug!("transport closed without close_notify");
                $self.conn.close(TlsError::ConnectionClosed);
                return Err(TlsError::ConnectionClosed);
            }
            return Ok(0);
        }
        $self.conn.deliver_ciphertext(&tmp[..n])?;
        Ok(n)
    }};
}

/// Body for `handshake`: exchange records until the connection is ready.
macro_rules! drive_handshake_body {
    ($mode:ident, $self:ident) => {{
        loop {
            maybe_await!($mode, $self.flush_tls())?;
            if $self.conn.is_ready() {
                return Ok(());
            }
            $self.conn.poll_validation()?;
            if $self.conn.wants_tx_step() {
                continue;
            }
            if $self.conn.is_waiting() {
                maybe_await!($mode, $self.wait());
                continue;
            }
            if maybe_await!($mode, $self.read_tls())? == 0 {
                return Err(TlsError::ConnectionClosed);
            }
        }
    }};
}

/// Body for `read` trait method. Returns `Ok(0)` once the peer has sent
/// close_notify and everything before it was consumed.
macro_rules! tls_read_body {
    ($mode:ident, $self:ident, $buf:ident) => {{
        if $buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = $self.conn.read_plaintext($buf)?;
            if n > 0 || $self.conn.is_peer_closed() {
                return Ok(n);
            }
            if !$self.conn.is_ready() {
                maybe_await!($mode, $self.drive_handshake())?;
                continue;
            }
            maybe_await!($mode, $self.read_tls())?;
            // A HelloRequest may have scheduled a new negotiation.
            maybe_await!($mode, $self.flush_tls())?;
        }
    }};
}

/// Body for `write` trait method.
macro_rules! tls_write_body {
    ($mode:ident, $self:ident, $buf:ident) => {{
        if !$self.conn.is_ready() {
            maybe_await!($mode, $self.drive_handshake())?;
        }
        if $buf.is_empty() {
            return Ok(0);
        }
        let n = $self.conn.write_plaintext($buf)?;
        maybe_await!($mode, $self.flush_tls())?;
        Ok(n)
    }};
}

/// Body for `shutdown` trait method: send close_notify once.
macro_rules! tls_shutdown_body {
    ($mode:ident, $self:ident) => {{
        if $self.conn.is_closed() {
            return Ok(());
        }
        $self.conn.send_close_notify()?;
        let out = $self.conn.take_ciphertext();
        maybe_await!($mode, $self.stream.write_all(&out))?;
        maybe_await!($mode, $self.stream.flush())?;
        Ok(())
    }};
}
