use clap::Parser;

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq, Eq)]
pub struct Opt {
    pub log_debug: bool,
    pub address: Option<String>,
    pub register: bool,
}

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version, about)]
struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug")]
    log_debug: bool,

    /// D-Bus address to connect to, instead of the session bus from DBUS_SESSION_BUS_ADDRESS
    #[arg(long)]
    address: Option<String>,

    /// Do not announce the item to the StatusNotifierWatcher, only answer property requests
    #[arg(long)]
    no_register: bool,
}

impl Opt {
    pub fn from_env() -> Self {
        RawOpt::parse().into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { log_debug, address, no_register } = other;
        Opt { log_debug, address, register: !no_register }
    }
}
