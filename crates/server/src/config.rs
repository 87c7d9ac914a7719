use physync::DEFAULT_PORT;

/// How inbound input batches are mapped onto simulation ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InputSchedule {
    /// Apply every batch at the tick the room is currently on.
    #[default]
    Immediate,
    /// Honor the tick the client stamped on the batch, clamped to the
    /// near future; trades a few ticks of delay for jitter absorption.
    ClientTick,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub input_schedule: InputSchedule,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            input_schedule: InputSchedule::Immediate,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
