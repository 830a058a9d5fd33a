//! Reactor event loops
//!
//! One main reactor accepts connections and round-robins them to N worker
//! reactors. Each worker owns a poll instance, an event loop thread and every
//! connection handed to it; all I/O is non-blocking and a connection is only
//! ever touched from its worker thread, so per-connection state needs no
//! locks.
//!
//! Handoff uses a channel plus a poll waker: the main reactor sends the
//! accepted socket and wakes the worker, which registers it with its own
//! poll instance.

use crate::server::conn::{Conn, ConnLifecycle};
use crate::server::Dispatcher;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Wake-up channel token; connection tokens start above it.
const WAKER_TOKEN: Token = Token(0);

/// Listener token on the main reactor
const LISTENER_TOKEN: Token = Token(0);

/// Main-reactor handle to one worker.
pub(crate) struct WorkerHandle {
    sender: Sender<(TcpStream, SocketAddr)>,
    waker: Arc<Waker>,
}

impl WorkerHandle {
    /// Hand a freshly accepted connection to this worker.
    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if self.sender.send((stream, peer)).is_err() {
            error!("worker channel closed, dropping connection");
            return;
        }
        if let Err(err) = self.waker.wake() {
            error!(%err, "failed to wake worker");
        }
    }
}

/// Spawn `count` worker reactors, each on its own thread.
pub(crate) fn spawn_workers(
    count: usize,
    dispatcher: Arc<Dispatcher>,
) -> io::Result<Vec<WorkerHandle>> {
    let mut handles = Vec::with_capacity(count);

    for id in 0..count {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (sender, receiver) = channel();

        let worker = Worker {
            id,
            poll,
            conns: HashMap::new(),
            incoming: receiver,
            dispatcher: dispatcher.clone(),
            next_token: 1,
        };

        thread::Builder::new()
            .name(format!("reactor-{}", id))
            .spawn(move || worker.run())?;

        handles.push(WorkerHandle { sender, waker });
    }

    Ok(handles)
}

/// Run the accept loop on the calling thread.
pub(crate) fn run_main(mut listener: TcpListener, workers: Vec<WorkerHandle>) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(64);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut next_worker = 0usize;

    loop {
        poll.poll(&mut events, None)?;

        for _event in events.iter() {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        debug!(%peer, worker = next_worker, "connection accepted");
                        workers[next_worker].dispatch(stream, peer);
                        next_worker = (next_worker + 1) % workers.len();
                    }
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        break;
                    }
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    poll: Poll,
    conns: HashMap<Token, Conn>,
    incoming: Receiver<(TcpStream, SocketAddr)>,
    dispatcher: Arc<Dispatcher>,
    next_token: usize,
}

impl Worker {
    fn run(mut self) {
        info!(worker = self.id, "worker reactor started");
        let mut events = Events::with_capacity(256);

        loop {
            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(worker = self.id, %err, "poll failed, stopping worker");
                return;
            }

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    self.adopt_incoming();
                } else {
                    self.drive_conn(event.token(), event.is_readable(), event.is_writable());
                }
            }
        }
    }

    /// Register every connection waiting on the handoff channel.
    fn adopt_incoming(&mut self) {
        while let Ok((mut stream, peer)) = self.incoming.try_recv() {
            let token = Token(self.next_token);
            self.next_token += 1;

            if let Err(err) =
                self.poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE)
            {
                error!(%peer, %err, "failed to register connection");
                continue;
            }

            match Conn::new(token, stream, peer, &self.dispatcher) {
                Ok(conn) => {
                    self.conns.insert(token, conn);
                }
                Err(err) => error!(%peer, %err, "failed to set up connection"),
            }
        }
    }

    fn drive_conn(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };

        let mut lifecycle = ConnLifecycle::Open;
        if writable {
            lifecycle = conn.on_writable(self.poll.registry());
        }
        if readable && lifecycle == ConnLifecycle::Open {
            lifecycle = conn.on_readable(self.poll.registry(), &self.dispatcher);
        }

        if lifecycle == ConnLifecycle::Closed {
            if let Some(mut conn) = self.conns.remove(&token) {
                conn.teardown(self.poll.registry());
            }
        }
    }
}

/// Bind a non-blocking listener, optionally with `SO_REUSEPORT`.
///
/// The option must be set before bind, which std's listener does not allow,
/// so the socket is assembled directly.
pub(crate) fn bind_listener(port: u16, reuse_port: bool) -> io::Result<TcpListener> {
    use std::os::fd::FromRawFd;

    fn close_on_err(fd: i32, err: io::Error) -> io::Result<TcpListener> {
        unsafe { libc::close(fd) };
        Err(err)
    }

    unsafe {
        let fd = libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        );
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let one: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            return close_on_err(fd, io::Error::last_os_error());
        }

        if reuse_port
            && libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            ) < 0
        {
            return close_on_err(fd, io::Error::last_os_error());
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: libc::INADDR_ANY,
            },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) < 0
        {
            return close_on_err(fd, io::Error::last_os_error());
        }

        if libc::listen(fd, 1024) < 0 {
            return close_on_err(fd, io::Error::last_os_error());
        }

        Ok(TcpListener::from_std(std::net::TcpListener::from_raw_fd(
            fd,
        )))
    }
}
