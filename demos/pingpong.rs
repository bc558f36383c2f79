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

//! One server coroutine answering `call`s from one client, then from two
//! contending clients. Prints the same trace the library's own end-to-end
//! tests assert on, as a runnable demonstration rather than a test.

use coroutine_mq::{queue_create, Builder};

fn single_client() {
    println!("-- single client, two round trips --");

    let requests = queue_create::<u32>();
    let replies = queue_create::<u32>();

    let server_requests = requests.clone();
    let server_replies = replies.clone();
    Builder::new().name("server".into()).spawn(move || {
        for _ in 0..2 {
            let ping = server_requests.wait().expect("ping");
            println!("server: pong {}", ping);
            server_replies.signal(ping);
        }
    });

    Builder::new().name("client".into()).spawn(move || {
        for ping in 1..=2u32 {
            println!("client: ping {}", ping);
            let pong = requests.call(ping, &replies);
            println!("client: got {:?} back", pong);
        }
    });
}

fn two_clients() {
    println!("-- two clients contending on one server queue --");

    let requests = queue_create::<(u32, u32)>(); // (client_id, seq)

    let server_requests = requests.clone();
    Builder::new().name("server".into()).spawn(move || {
        for _ in 0..6 {
            let (msg, reply_q) = server_requests.recv::<(u32, u32)>();
            let (client_id, seq) = msg.expect("request");
            println!("server: serving client {} seq {}", client_id, seq);
            reply_q.expect("reply queue attached by call").signal((client_id, seq));
        }
    });

    for client_id in 1..=2u32 {
        let reqs = requests.clone();
        Builder::new()
            .name(format!("client-{}", client_id))
            .spawn(move || {
                let replies = queue_create::<(u32, u32)>();
                for seq in 1..=3u32 {
                    let reply = reqs.call((client_id, seq), &replies);
                    println!("client-{}: got {:?}", client_id, reply);
                }
            });
    }
}

fn main() {
    env_logger::init();
    single_client();
    two_clients();
}
