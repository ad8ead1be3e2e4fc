use tracing_subscriber::{filter::Directive, EnvFilter};

const LIBRARY_DIRECTIVE: &str = "billing_service=info";

/// Tracing for the service binary.
pub fn init_tracing() {
    init_tracing_for(&[]);
}

/// Tracing for a helper binary; `targets` are extra `crate=level` directives
/// (binary crates log under their own name).
pub fn init_tracing_for(targets: &[&str]) {
    let mut filter = EnvFilter::from_default_env();
    for raw in std::iter::once(&LIBRARY_DIRECTIVE).chain(targets) {
        match raw.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("ignoring log directive '{raw}': {e}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
