//! meshircd, the TS6 mesh IRC daemon.
//!
//! Boots the engine on a single-threaded runtime and wires it to a plain
//! TCP link listener. Everything stateful runs on one scheduler: link I/O
//! tasks only shuttle lines in and frames out, so no two mutations ever
//! race and nothing needs a lock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use meshirc_proto::Message;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use meshircd::config::Config;
use meshircd::sync::handshake::Handshake;
use meshircd::Engine;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "meshircd.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path))?;

    info!(
        server = %config.server.name,
        sid = %config.server.sid,
        "starting meshircd"
    );

    let engine = Engine::new(config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(run(Rc::new(RefCell::new(engine)))))
}

async fn run(engine: Rc<RefCell<Engine>>) -> anyhow::Result<()> {
    let listen = engine.borrow().config.server.link_listen.clone();
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding link listener on {}", listen))?;
    info!(%listen, "link listener bound");

    // Ban expiry sweep.
    {
        let engine = engine.clone();
        let interval = engine.borrow().config.limits.expiry_interval;
        tokio::task::spawn_local(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                tick.tick().await;
                engine.borrow_mut().tick(Engine::now());
                drain_local_queues(&engine);
            }
        });
    }

    // Dial configured peers.
    let autoconnect: Vec<_> = engine
        .borrow()
        .config
        .links
        .iter()
        .filter(|l| l.autoconnect)
        .cloned()
        .collect();
    for block in autoconnect {
        let engine = engine.clone();
        tokio::task::spawn_local(async move {
            match TcpStream::connect((block.hostname.as_str(), block.port)).await {
                Ok(stream) => {
                    info!(peer = %block.name, "outbound link established");
                    handle_connection(engine, stream, Some(block.password)).await;
                }
                Err(err) => {
                    warn!(peer = %block.name, error = %err, "outbound link failed");
                }
            }
        });
    }

    loop {
        let (stream, addr) = listener.accept().await?;
        info!(%addr, "inbound link connection");
        let engine = engine.clone();
        tokio::task::spawn_local(handle_connection(engine, stream, None));
    }
}

/// Drive one peer connection from handshake to teardown.
async fn handle_connection(
    engine: Rc<RefCell<Engine>>,
    stream: TcpStream,
    outbound_password: Option<String>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut handshake = if outbound_password.is_some() {
        Handshake::outbound()
    } else {
        Handshake::inbound()
    };
    if let Some(password) = &outbound_password {
        let intro = {
            let engine = engine.borrow();
            Handshake::introduction(&engine.config, password)
        };
        for msg in intro {
            if write_frame(&mut write_half, &msg).await.is_err() {
                return;
            }
        }
    }

    // Handshake phase: no engine state exists for this peer yet.
    let identity = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => return,
        };
        let msg: Message = match line.parse() {
            Ok(msg) => msg,
            Err(err) => {
                debug!(error = %err, "unparsable frame during handshake");
                continue;
            }
        };
        let step = {
            let engine = engine.borrow();
            handshake.step(&engine.config, &msg)
        };
        match step {
            Ok(step) => {
                for reply in step.reply {
                    if write_frame(&mut write_half, &reply).await.is_err() {
                        return;
                    }
                }
                if let Some(identity) = step.registered {
                    break identity;
                }
            }
            Err(err) => {
                warn!(error = %err, "handshake failed");
                let text = err.to_string();
                let error = Message::new(None, "ERROR", [text.as_str()]);
                let _ = write_frame(&mut write_half, &error).await;
                return;
            }
        }
    };

    let sid = identity.sid;
    let outq = engine.borrow_mut().register_peer(identity, Engine::now());
    drain_local_queues(&engine);
    let Some(mut outq) = outq else {
        let error = Message::new(None, "ERROR", ["SID collision"]);
        let _ = write_frame(&mut write_half, &error).await;
        return;
    };

    // Writer drains the link queue in order.
    let writer = tokio::task::spawn_local(async move {
        while let Some(msg) = outq.recv().await {
            if write_frame(&mut write_half, &msg).await.is_err() {
                break;
            }
        }
    });

    // Reader feeds the engine one frame at a time.
    while let Ok(Some(line)) = lines.next_line().await {
        engine.borrow_mut().handle_line(sid, &line, Engine::now());
        drain_local_queues(&engine);
    }

    engine.borrow_mut().drop_link(sid, None);
    drain_local_queues(&engine);
    writer.abort();
}

async fn write_frame(write_half: &mut OwnedWriteHalf, msg: &Message) -> std::io::Result<()> {
    write_half
        .write_all(format!("{}\r\n", msg).as_bytes())
        .await
}

/// This binary attaches no client layer; surface what one would consume.
fn drain_local_queues(engine: &Rc<RefCell<Engine>>) {
    let mut engine = engine.borrow_mut();
    for (uid, msg) in engine.net.client_out.drain(..).collect::<Vec<_>>() {
        debug!(%uid, frame = %msg, "client numeric (no client layer attached)");
    }
    for (uid, reason) in engine.net.client_disconnects.drain(..).collect::<Vec<_>>() {
        info!(%uid, reason, "client disconnect requested");
    }
}
