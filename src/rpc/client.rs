/// Blocking RPC clients for the two services.
///
/// Used by device frontends and by the integration tests. Responses are
/// paired to calls by id, so a response arriving out of order is parked
/// until its call comes around. A disconnect mid-call surfaces as the
/// conventional `-EINTR` in `ret`.
use super::protocol::{self, PrivRequest, Request, Response, UnprivRequest};
use crate::{EsdmError, EsdmResult, RPC_MAX_MSG_LEN};
use serde::Serialize;
use std::os::unix::net::UnixStream;
use std::path::Path;

struct Conn {
    stream: UnixStream,
    next_id: u64,
    parked: Vec<Response>,
}

impl Conn {
    fn connect(path: &Path) -> EsdmResult<Self> {
        Ok(Self {
            stream: UnixStream::connect(path)?,
            next_id: 1,
            parked: Vec::new(),
        })
    }

    fn call<B: Serialize>(&mut self, body: B) -> EsdmResult<Response> {
        let id = self.next_id;
        self.next_id += 1;
        protocol::write_frame(&mut self.stream, &Request { id, body })?;

        if let Some(pos) = self.parked.iter().position(|r| r.id == id) {
            return Ok(self.parked.swap_remove(pos));
        }
        loop {
            match protocol::read_frame::<Response>(&mut self.stream) {
                Ok(resp) if resp.id == id => return Ok(resp),
                Ok(other) => self.parked.push(other),
                Err(EsdmError::Io(e)) => {
                    tracing::debug!(error = %e, "connection lost mid-call");
                    return Ok(Response::ok(id, -i64::from(libc::EINTR)));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn checked(resp: Response) -> EsdmResult<Response> {
    if resp.ret < 0 {
        Err(EsdmError::from_errno(-resp.ret))
    } else {
        Ok(resp)
    }
}

/// Client of the unprivileged service.
pub struct EsdmClient {
    conn: Conn,
}

impl EsdmClient {
    pub fn connect(path: &Path) -> EsdmResult<Self> {
        Ok(Self {
            conn: Conn::connect(path)?,
        })
    }

    pub fn status(&mut self) -> EsdmResult<String> {
        let resp = checked(self.conn.call(UnprivRequest::Status)?)?;
        Ok(resp.text.unwrap_or_default())
    }

    fn get_bytes_with<F>(&mut self, len: usize, make: F) -> EsdmResult<Vec<u8>>
    where
        F: Fn(usize) -> UnprivRequest,
    {
        // The server enforces the payload ceiling; the client chunks
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let chunk = (len - out.len()).min(RPC_MAX_MSG_LEN);
            let resp = checked(self.conn.call(make(chunk))?)?;
            if resp.data.is_empty() {
                return Err(EsdmError::Transient("server delivered no data".into()));
            }
            out.extend_from_slice(&resp.data);
        }
        out.truncate(len);
        Ok(out)
    }

    /// Best-effort randomness, never blocks on seeding state.
    pub fn get_random_bytes(&mut self, len: usize) -> EsdmResult<Vec<u8>> {
        self.get_bytes_with(len, |len| UnprivRequest::GetRandomBytes { len })
    }

    /// Fully-seeded randomness; waits for the operational state unless
    /// `nonblock`.
    pub fn get_random_bytes_full(&mut self, len: usize, nonblock: bool) -> EsdmResult<Vec<u8>> {
        self.get_bytes_with(len, |len| UnprivRequest::GetRandomBytesFull { len, nonblock })
    }

    /// Randomness backed by at least the minimal seed level; waits for it.
    pub fn get_random_bytes_min(&mut self, len: usize) -> EsdmResult<Vec<u8>> {
        self.get_bytes_with(len, |len| UnprivRequest::GetRandomBytesMin { len })
    }

    pub fn get_ent_lvl(&mut self) -> EsdmResult<u32> {
        let resp = checked(self.conn.call(UnprivRequest::GetEntLvl)?)?;
        Ok(resp.ret as u32)
    }

    pub fn get_min_reseed_secs(&mut self) -> EsdmResult<u64> {
        let resp = checked(self.conn.call(UnprivRequest::GetMinReseedSecs)?)?;
        Ok(resp.ret as u64)
    }

    /// Mix caller material into the aux pool without entropy credit.
    pub fn write_data(&mut self, data: &[u8]) -> EsdmResult<()> {
        for chunk in data.chunks(RPC_MAX_MSG_LEN) {
            checked(self.conn.call(UnprivRequest::WriteData {
                data: chunk.to_vec(),
            })?)?;
        }
        Ok(())
    }

    pub fn rnd_get_ent_cnt(&mut self) -> EsdmResult<u32> {
        let resp = checked(self.conn.call(UnprivRequest::RndGetEntCnt)?)?;
        Ok(resp.ret as u32)
    }

    /// Raw single-shot call, exposed for protocol-level tests.
    pub fn raw_call(&mut self, req: UnprivRequest) -> EsdmResult<Response> {
        self.conn.call(req)
    }
}

/// Client of the privileged service.
pub struct EsdmPrivClient {
    conn: Conn,
}

impl EsdmPrivClient {
    pub fn connect(path: &Path) -> EsdmResult<Self> {
        Ok(Self {
            conn: Conn::connect(path)?,
        })
    }

    pub fn rnd_add_to_ent_cnt(&mut self, delta_bits: u32) -> EsdmResult<()> {
        checked(self.conn.call(PrivRequest::RndAddToEntCnt { delta_bits })?)?;
        Ok(())
    }

    pub fn rnd_add_entropy(&mut self, data: &[u8], ent_bits: u32) -> EsdmResult<()> {
        checked(self.conn.call(PrivRequest::RndAddEntropy {
            data: data.to_vec(),
            ent_bits,
        })?)?;
        Ok(())
    }

    pub fn rnd_clear_pool(&mut self) -> EsdmResult<()> {
        checked(self.conn.call(PrivRequest::RndClearPool)?)?;
        Ok(())
    }

    pub fn rnd_reseed_crng(&mut self) -> EsdmResult<()> {
        checked(self.conn.call(PrivRequest::RndReseedCrng)?)?;
        Ok(())
    }

    pub fn raw_call(&mut self, req: PrivRequest) -> EsdmResult<Response> {
        self.conn.call(req)
    }
}
