use super::{
    Worker,
    protocol::{Request, Response, ServerChannel},
};
use crate::ipc::{Connection, receive_packet, send_packet};
use anyhow::{Context, Result};
use interprocess::local_socket::{
    GenericNamespaced, ListenerOptions, Stream, ToNsName,
    traits::{ListenerExt, Stream as StreamTrait},
};
use std::{
    ffi::OsStr,
    io::BufReader,
    process::{Child, Command},
};

/// The worker end of a local socket connection, used by the worker binary.
pub struct SocketChannel {
    conn: Connection,
}

impl SocketChannel {
    pub fn connect(socket_name: &str) -> Result<Self> {
        let name = socket_name.to_ns_name::<GenericNamespaced>()?;
        let conn = Stream::connect(name)
            .with_context(|| format!("could not connect to socket {socket_name}"))?;
        Ok(Self {
            conn: BufReader::new(conn),
        })
    }
}

impl ServerChannel for SocketChannel {
    fn recv_request(&mut self) -> Result<Request> {
        receive_packet(&mut self.conn)
    }

    fn send_response(&mut self, response: Response) -> Result<()> {
        send_packet(&mut self.conn, response)
    }
}

/// One environment in a child process. The child is expected to connect back to
/// `socket_name`, which it receives through `--socket-name`.
pub struct ProcessWorker {
    conn: Connection,
    child: Child,
}

impl ProcessWorker {
    pub fn spawn<S: AsRef<OsStr>>(program: S, args: &[String], socket_name: &str) -> Result<Self> {
        let name = socket_name.to_ns_name::<GenericNamespaced>()?;
        let listener = ListenerOptions::new().name(name).create_sync()?;
        let child = Command::new(program)
            .args(args)
            .args(["--socket-name", socket_name])
            .spawn()
            .context("could not spawn worker process")?;
        let conn = listener
            .incoming()
            .next()
            .context("listener closed before the worker connected")??;
        tracing::debug!(pid = child.id(), socket_name, "worker process connected");
        Ok(Self {
            conn: BufReader::new(conn),
            child,
        })
    }
}

impl Worker for ProcessWorker {
    fn send(&mut self, request: Request) -> Result<()> {
        send_packet(&mut self.conn, request)
    }

    fn recv(&mut self) -> Result<Response> {
        receive_packet(&mut self.conn)
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        // the worker exits on its own after receiving `Exit`
        if let Ok(None) = self.child.try_wait() {
            let _ = send_packet(&mut self.conn, Request::Exit);
            let _ = self.child.wait();
        }
    }
}
