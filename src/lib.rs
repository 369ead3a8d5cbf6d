pub mod backend;
pub mod config;
pub mod output;
pub mod parser;
pub mod rng;
pub mod session;

// Re-export common types
pub use config::{Sampler, SessionConfig};
pub use session::Session;

pub mod logging {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    pub fn init_logger() {
        Builder::new()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} [{}] - {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    record.args()
                )
            })
            .filter(None, LevelFilter::Info)
            .init();
    }
}
