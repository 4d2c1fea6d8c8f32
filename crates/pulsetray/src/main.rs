use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use notifier_item::{names, Connection, Message, Reactor, StatusNotifierItem};

mod opts;

fn main() {
    let opts = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("pulsetray"), log_level_filter)
            .filter(Some("notifier_item"), log_level_filter)
            .init();
    }

    if let Err(err) = run(opts) {
        log::error!("{:?}", err);
        std::process::exit(1);
    }
}

fn run(opts: opts::Opt) -> Result<()> {
    let mut connection = Connection::session(opts.address.as_deref()).context("Failed to connect to the session bus")?;
    let unique_name = connection.unique_name().to_string();
    connection.register_object_path(names::ITEM_OBJECT)?;
    connection.register_object_path(names::MENU_OBJECT)?;

    let mut reactor = Reactor::new(connection, StatusNotifierItem::new()).context("Failed to set up the event loop")?;

    let stop = reactor.stop_handle();
    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], move |_| {
        log::info!("Shutting down pulsetray...");
        stop.store(true, Ordering::SeqCst);
    });

    if opts.register {
        let register =
            Message::method_call(names::WATCHER_BUS, names::WATCHER_OBJECT, names::WATCHER_INTERFACE, "RegisterStatusNotifierItem")?
                .with_body(&(unique_name.as_str(),))?;
        reactor.send(register).context("Failed to register with the StatusNotifierWatcher")?;
        log::info!("Registering {} with {}", unique_name, names::WATCHER_BUS);
    }
    reactor.flush()?;

    reactor.run_forever().context("Event loop failed")
}
