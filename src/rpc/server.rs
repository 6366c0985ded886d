/// RPC services: one accept thread plus a bounded pool of synchronous
/// workers per service.
///
/// A worker owns a connection until the peer hangs up; a call that
/// suspends (waiting for the operational state) parks only that worker.
/// All reads poll with a short timeout so shutdown can reclaim every
/// thread without tearing sockets out from under the OS.
use super::protocol::{self, PrivRequest, Request, Response, UnprivRequest};
use crate::{EsdmContext, EsdmError, EsdmResult, RPC_MAX_MSG_LEN};
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const WORKER_POLL: Duration = Duration::from_millis(200);
const READ_POLL: Duration = Duration::from_millis(250);

/// Default worker count for the privileged service; management traffic is
/// sparse.
const PRIV_WORKERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceKind {
    Unprivileged,
    Privileged,
}

pub struct RpcService {
    label: &'static str,
    accept: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl RpcService {
    pub fn spawn_unpriv(
        ctx: &Arc<EsdmContext>,
        path: &Path,
        workers: usize,
    ) -> EsdmResult<Self> {
        Self::spawn(
            ctx,
            path,
            0o666,
            workers.max(1),
            ServiceKind::Unprivileged,
            false,
            "rpc-unpriv",
        )
    }

    pub fn spawn_priv(ctx: &Arc<EsdmContext>, path: &Path, test_mode: bool) -> EsdmResult<Self> {
        Self::spawn(
            ctx,
            path,
            0o600,
            PRIV_WORKERS,
            ServiceKind::Privileged,
            test_mode,
            "rpc-priv",
        )
    }

    fn spawn(
        ctx: &Arc<EsdmContext>,
        path: &Path,
        mode: u32,
        workers: usize,
        kind: ServiceKind,
        test_mode: bool,
        label: &'static str,
    ) -> EsdmResult<Self> {
        // A stale socket from a crashed daemon would make bind fail
        if path.exists() {
            fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        listener.set_nonblocking(true)?;

        let (tx, rx) = mpsc::channel::<UnixStream>();
        let rx = Arc::new(Mutex::new(rx));

        let mut worker_handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let ctx = Arc::clone(ctx);
            let rx = Arc::clone(&rx);
            worker_handles.push(
                thread::Builder::new()
                    .name(format!("{label}-worker{n}"))
                    .spawn(move || worker_loop(&ctx, &rx, kind, test_mode))
                    .map_err(EsdmError::Io)?,
            );
        }

        let accept_ctx = Arc::clone(ctx);
        let socket_path = path.to_path_buf();
        let accept = thread::Builder::new()
            .name(format!("{label}-accept"))
            .spawn(move || {
                accept_loop(&accept_ctx, &listener, &tx);
                drop(listener);
                let _ = fs::remove_file(&socket_path);
            })
            .map_err(EsdmError::Io)?;

        tracing::info!(service = label, path = %path.display(), workers, "RPC service listening");
        Ok(Self {
            label,
            accept: Some(accept),
            workers: worker_handles,
        })
    }

    /// Join all threads; the context's shutdown flag must already be set.
    pub fn join(mut self) {
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        tracing::debug!(service = self.label, "RPC service stopped");
    }
}

fn accept_loop(ctx: &EsdmContext, listener: &UnixListener, tx: &mpsc::Sender<UnixStream>) {
    while !ctx.is_shutdown() {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if tx.send(stream).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn worker_loop(
    ctx: &EsdmContext,
    rx: &Arc<Mutex<mpsc::Receiver<UnixStream>>>,
    kind: ServiceKind,
    test_mode: bool,
) {
    while !ctx.is_shutdown() {
        let stream = {
            let rx = rx.lock().unwrap();
            rx.recv_timeout(WORKER_POLL)
        };
        match stream {
            Ok(stream) => handle_connection(ctx, stream, kind, test_mode),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn handle_connection(ctx: &EsdmContext, mut stream: UnixStream, kind: ServiceKind, test_mode: bool) {
    if stream.set_read_timeout(Some(READ_POLL)).is_err() {
        return;
    }
    let authorized = match kind {
        ServiceKind::Unprivileged => true,
        ServiceKind::Privileged => peer_authorized(&stream, test_mode),
    };

    loop {
        let body = match read_frame_body(ctx, &mut stream) {
            Ok(Some(body)) => body,
            Ok(None) => return, // peer hung up
            Err(_) => return,   // shutdown or broken frame
        };

        let response = match kind {
            ServiceKind::Unprivileged => match protocol::decode::<Request<UnprivRequest>>(&body) {
                Ok(req) => dispatch_unpriv(ctx, req.body, req.id),
                Err(e) => Response::err(0, &e),
            },
            ServiceKind::Privileged => match protocol::decode::<Request<PrivRequest>>(&body) {
                Ok(req) => dispatch_priv(ctx, req.body, req.id, authorized),
                Err(e) => Response::err(0, &e),
            },
        };

        let frame = match protocol::encode(&response) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "response encoding failed");
                return;
            }
        };
        if stream.write_all(&frame).and_then(|()| stream.flush()).is_err() {
            return;
        }
    }
}

/// Read one length-prefixed frame body. `Ok(None)` is a clean EOF at a
/// frame boundary; shutdown aborts mid-read.
fn read_frame_body(ctx: &EsdmContext, stream: &mut UnixStream) -> EsdmResult<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    if !fill_buf(ctx, stream, &mut len_buf)? {
        return Ok(None);
    }
    let len = protocol::check_frame_len(u32::from_le_bytes(len_buf) as usize)?;
    let mut body = vec![0u8; len];
    if !fill_buf(ctx, stream, &mut body)? {
        return Err(EsdmError::Transient("peer closed mid-frame".into()));
    }
    Ok(Some(body))
}

/// Fill `buf` completely, polling so shutdown stays responsive. `false`
/// means EOF before the first byte.
fn fill_buf(ctx: &EsdmContext, stream: &mut UnixStream, buf: &mut [u8]) -> EsdmResult<bool> {
    let mut filled = 0usize;
    while filled < buf.len() {
        if ctx.is_shutdown() {
            return Err(EsdmError::Transient("shutdown".into()));
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(EsdmError::Transient("peer closed mid-frame".into()));
            }
            Ok(n) => filled += n,
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.kind() == ErrorKind::TimedOut
                    || e.kind() == ErrorKind::Interrupted =>
            {
                continue
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn peer_authorized(stream: &UnixStream, test_mode: bool) -> bool {
    match getsockopt(stream, PeerCredentials) {
        Ok(cred) => {
            let uid = cred.uid();
            uid == 0 || (test_mode && uid == nix::unistd::geteuid().as_raw())
        }
        Err(e) => {
            tracing::warn!(error = %e, "peer credential check failed");
            false
        }
    }
}

fn generate_bytes(ctx: &EsdmContext, len: usize) -> EsdmResult<Vec<u8>> {
    if len > RPC_MAX_MSG_LEN {
        return Err(EsdmError::InvalidArgument(format!(
            "request of {len} bytes exceeds the {RPC_MAX_MSG_LEN} byte payload limit"
        )));
    }
    let instance = ctx.manager.node_instance(&ctx.config)?;
    let mut out = vec![0u8; len];
    let produced = instance.generate(ctx, &mut out)?;
    out.truncate(produced);
    Ok(out)
}

fn unpriv_call(ctx: &EsdmContext, req: UnprivRequest) -> EsdmResult<Response> {
    match req {
        UnprivRequest::Status => Ok(Response {
            id: 0,
            ret: 0,
            data: Vec::new(),
            text: Some(ctx.status_report()),
        }),
        UnprivRequest::GetRandomBytes { len } => {
            let data = generate_bytes(ctx, len)?;
            Ok(Response {
                id: 0,
                ret: data.len() as i64,
                data,
                text: None,
            })
        }
        UnprivRequest::GetRandomBytesFull { len, nonblock } => {
            ctx.state.sleep_while_nonoperational(nonblock)?;
            let data = generate_bytes(ctx, len)?;
            Ok(Response {
                id: 0,
                ret: data.len() as i64,
                data,
                text: None,
            })
        }
        UnprivRequest::GetRandomBytesMin { len } => {
            ctx.state.sleep_while_non_min_seeded()?;
            let data = generate_bytes(ctx, len)?;
            Ok(Response {
                id: 0,
                ret: data.len() as i64,
                data,
                text: None,
            })
        }
        UnprivRequest::GetEntLvl => Ok(Response::ok(0, i64::from(ctx.avail_entropy()))),
        UnprivRequest::GetMinReseedSecs => {
            Ok(Response::ok(0, ctx.manager.min_reseed_secs() as i64))
        }
        UnprivRequest::WriteData { data } => {
            if data.len() > RPC_MAX_MSG_LEN {
                return Err(EsdmError::InvalidArgument(
                    "write_data payload exceeds limit".into(),
                ));
            }
            // Mixed in without credit
            ctx.sources.aux().insert(&data, 0, &ctx.config);
            ctx.wake_seeder();
            Ok(Response::ok(0, 0))
        }
        UnprivRequest::RndGetEntCnt => {
            Ok(Response::ok(0, i64::from(ctx.sources.aux().entropy_cnt())))
        }
    }
}

/// Unprivileged service dispatch. Only `status` is served while the
/// manager is unavailable (failed selftests or not yet initialised).
pub fn dispatch_unpriv(ctx: &EsdmContext, req: UnprivRequest, id: u64) -> Response {
    if req != UnprivRequest::Status && !ctx.manager.avail() {
        return Response::err(id, &EsdmError::NotAvailable);
    }
    match unpriv_call(ctx, req) {
        Ok(mut resp) => {
            resp.id = id;
            resp
        }
        Err(e) => Response::err(id, &e),
    }
}

/// Privileged service dispatch. The peer must be root (or the daemon's
/// own user in test mode); anything else is rejected without state
/// change.
pub fn dispatch_priv(ctx: &EsdmContext, req: PrivRequest, id: u64, authorized: bool) -> Response {
    if !authorized {
        return Response::err(id, &EsdmError::Permission);
    }
    if !ctx.manager.avail() {
        return Response::err(id, &EsdmError::NotAvailable);
    }

    match req {
        PrivRequest::RndAddToEntCnt { delta_bits } => {
            ctx.sources.aux().add_to_entropy_cnt(delta_bits);
            ctx.wake_seeder();
            Response::ok(id, 0)
        }
        PrivRequest::RndAddEntropy { data, ent_bits } => {
            if data.len() > RPC_MAX_MSG_LEN {
                return Response::err(
                    id,
                    &EsdmError::InvalidArgument("entropy payload exceeds limit".into()),
                );
            }
            if u64::from(ent_bits) > data.len() as u64 * 8 {
                return Response::err(
                    id,
                    &EsdmError::InvalidArgument(
                        "entropy credit exceeds payload size".into(),
                    ),
                );
            }
            ctx.sources.aux().insert(&data, ent_bits, &ctx.config);
            ctx.wake_seeder();
            Response::ok(id, 0)
        }
        PrivRequest::RndClearPool => {
            ctx.sources.aux().clear();
            Response::ok(id, 0)
        }
        PrivRequest::RndReseedCrng => {
            ctx.manager.force_reseed();
            ctx.wake_seeder();
            Response::ok(id, 0)
        }
    }
}
