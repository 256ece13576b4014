//! Subscribe to a topic and print what arrives.
//!
//! Run with: cargo run -p mqlink-client --example subscribe -- [config.toml] [topic]
//!
//! Broker settings come from the TOML file (default `mqlink.toml`, optional)
//! and `MQLINK__` environment variables, e.g. `MQLINK__BROKER__PORT=1884`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use mqlink_client::{DisconnectHandler, MessageHandler, Session, Settings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "mqlink.toml".to_string());
    let topic = args.next().unwrap_or_else(|| "home/temp".to_string());

    let settings = Settings::load(&config_path)?;
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&settings.log.level),
    )
    .init();

    let session = Session::new(settings.session.clone())?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let on_disconnect: Arc<dyn DisconnectHandler> = Arc::new(move |reason: Option<&str>| {
        println!("Disconnected: {}", reason.unwrap_or("requested"));
        flag.store(false, Ordering::SeqCst);
    });
    session.on_disconnect(Arc::downgrade(&on_disconnect));

    let broker = &settings.broker;
    let client_id = if broker.client_id.is_empty() {
        format!("mqlink-{}", std::process::id())
    } else {
        broker.client_id.clone()
    };
    session.connect(
        &broker.host,
        broker.port,
        &client_id,
        broker.username.as_deref(),
        broker.password.as_deref(),
    )?;
    info!("Connected to {}:{}", broker.host, broker.port);

    let on_message: Arc<dyn MessageHandler> = Arc::new(|topic: &str, payload: &[u8]| {
        println!("{}: {}", topic, String::from_utf8_lossy(payload));
    });
    session.subscribe(&topic, Arc::downgrade(&on_message))?;
    session.publish(&topic, b"hello from mqlink")?;

    let dispatcher = session.dispatcher();
    while running.load(Ordering::SeqCst) {
        dispatcher.dispatch_timeout(Duration::from_millis(100));
    }
    Ok(())
}
