use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

/// Pure clap command definitions with zero business logic
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("dsn")
                .env("DBPROBE_DSN")
                .help("mysql://<username>:<password>@tcp(<host>:<port>)/")
                .long("dsn")
                .short('d')
                .required(true),
        )
        .arg(
            Arg::new("databases")
                .default_value("dbusers,dbcheckin,dbmercocamp")
                .env("DBPROBE_DATABASES")
                .help("Databases probed by the sweep, in order")
                .long("databases")
                .short('D')
                .value_delimiter(',')
                .value_name("NAME,..."),
        )
        .arg(
            Arg::new("users-database")
                .default_value("dbusers")
                .env("DBPROBE_USERS_DATABASE")
                .help("Database holding the users table")
                .long("users-database")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("users-table")
                .default_value("users")
                .env("DBPROBE_USERS_TABLE")
                .help("Table sampled by /test/users")
                .long("users-table")
                .value_name("TABLE"),
        )
        .arg(
            Arg::new("full-suite")
                .default_value("lenient")
                .env("DBPROBE_FULL_SUITE")
                .help("Policy of /test/complete when TCP fails: strict, lenient")
                .long("full-suite")
                .long_help(
                    "Continuation policy of /test/complete after a failed TCP stage:\n\n\
                    - strict: stop the suite, answer 500 with the TCP outcome as partial_results\n\
                    - lenient: record the TCP failure and still run the MySQL stages (default)\n\n\
                    Both policies are always available at /test/complete/strict and\n\
                    /test/complete/lenient."
                )
                .value_name("POLICY")
                .value_parser(["strict", "lenient"]),
        )
        .arg(
            Arg::new("environment")
                .default_value("development")
                .env("DBPROBE_ENVIRONMENT")
                .help("Deployment environment, production hides internal error details")
                .long("environment")
                .short('e')
                .value_name("ENV")
                .value_parser(["production", "development"]),
        )
        .arg(
            Arg::new("listen")
                .env("DBPROBE_LISTEN")
                .help("IP address to bind to (default: [::]:port, accepts both IPv6 and IPv4)")
                .long("listen")
                .long_help(
                    "IP address to bind to:\n\
                    Not specified (default) binds to [::]:port which accepts both IPv6 and IPv4 connections.\n\
                    Falls back to 0.0.0.0:port if IPv6 is unavailable.\n\n\
                    Specific IPv4 examples: '0.0.0.0', '127.0.0.1'\n\
                    Specific IPv6: '::', '::1'"
                )
                .short('l')
                .value_name("IP"),
        )
        .arg(
            Arg::new("port")
                .default_value("5001")
                .env("DBPROBE_PORT")
                .help("listening port for the HTTP API")
                .long("port")
                .short('p')
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("verbose")
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)")
                .long("verbose")
                .short('v')
                .action(ArgAction::Count),
        )
}
