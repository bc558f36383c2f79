// The MIT License (MIT)

// Copyright (c) 2015 Rustcc developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Coroutine-per-connection TCP echo server.
//!
//! The core knows nothing about sockets or `mio` — it only offers
//! `suspend_self()`/`resume()`. This binary supplies the missing half: a
//! single `mio::Poll` event loop, keyed by `Token`, that resumes whichever
//! coroutine was waiting on the socket that just became ready. A coroutine
//! that would block on a read or write registers its interest and parks
//! itself; the event loop is the only thing that ever calls `resume()` on
//! it again.
//!
//! This glue lives entirely here, never in `src/`: the core stays usable
//! without pulling in an I/O reactor at all.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::rc::Rc;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use coroutine_mq::{suspend_self, Coroutine};

const LISTENER: Token = Token(0);

/// Registers a coroutine as "waiting for readiness on this token" and hands
/// back the table the event loop consults to resume it.
type Waiters = Rc<RefCell<HashMap<Token, Coroutine>>>;

thread_local! {
    static NEXT_TOKEN: RefCell<usize> = RefCell::new(1);
}

fn next_token() -> Token {
    NEXT_TOKEN.with(|n| {
        let mut n = n.borrow_mut();
        let t = Token(*n);
        *n += 1;
        t
    })
}

/// Parks the calling coroutine until `token`'s registered interest fires,
/// then returns. Must be called from within a coroutine.
fn wait_for_readiness(waiters: &Waiters, token: Token) {
    let me = coroutine_mq::current().expect("wait_for_readiness called from root");
    waiters.borrow_mut().insert(token, me);
    suspend_self();
}

fn handle_connection(mut stream: TcpStream, poll: Rc<Poll>, waiters: Waiters) {
    let token = next_token();
    poll.registry()
        .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
        .expect("failed to register connection with the event loop");

    let mut buf = [0u8; 4096];
    loop {
        wait_for_readiness(&waiters, token);
        match stream.read(&mut buf) {
            Ok(0) => break, // peer closed
            Ok(n) => {
                if let Err(e) = stream.write_all(&buf[..n]) {
                    log::warn!("echo write failed: {}", e);
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                log::warn!("echo read failed: {}", e);
                break;
            }
        }
    }
    let _ = poll.registry().deregister(&mut stream);
}

fn main() -> io::Result<()> {
    env_logger::init();

    let addr = "127.0.0.1:7007".parse().unwrap();
    let mut listener = TcpListener::bind(addr)?;
    let poll = Rc::new(Poll::new()?);
    poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;

    let waiters: Waiters = Rc::new(RefCell::new(HashMap::new()));
    let mut events = Events::with_capacity(128);

    println!("echo server listening on {}", addr);

    loop {
        poll.poll(&mut events, None)?;
        for event in events.iter() {
            if event.token() == LISTENER {
                loop {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            log::debug!("accepted connection from {}", peer);
                            let poll = poll.clone();
                            let waiters = waiters.clone();
                            coroutine_mq::spawn(move || handle_connection(stream, poll, waiters));
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => return Err(e),
                    }
                }
            } else if let Some(co) = waiters.borrow_mut().remove(&event.token()) {
                // `resume` only re-queues `co`; root has to drive the
                // scheduler itself with `yield_now` to actually run it back
                // to its next suspension point.
                coroutine_mq::resume(&co);
                coroutine_mq::yield_now();
            }
        }
    }
}
