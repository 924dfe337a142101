use clap::Parser;

/// The listen address is fixed; see `ProxyConfig::DEFAULT_BIND_ADDR`.
#[derive(Parser)]
#[command(
    name = "socksd",
    version,
    about = "SOCKS5 proxy on 127.0.0.1:1080 (no auth, CONNECT only)",
    long_about = "SOCKS5 proxy on 127.0.0.1:1080.\n\n\
                  Accepts the \"no authentication\" method and CONNECT requests to IPv4 \
                  or domain-name destinations. Set SOCKSD_LOG to change the log filter \
                  (default: info)."
)]
pub struct Cli {}
