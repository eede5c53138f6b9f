use coopmac_config::NodeID;
use std::fs::OpenOptions;
use std::io::{LineWriter, Write};
use std::num::Wrapping;
use std::path::Path;
use std::time::Duration;

pub trait StatsLogger {
    fn new(path: &str) -> Result<Self, std::io::Error>
    where
        Self: Sized;
    fn log(&mut self, data: &str);
}

/// Appends every row to a CSV file, creating parent directories as needed.
pub struct CsvStatsLogger {
    line_buffer: LineWriter<std::fs::File>,
}

impl StatsLogger for CsvStatsLogger {
    fn new(path: &str) -> Result<Self, std::io::Error>
    where
        Self: Sized,
    {
        let p = Path::new(path);

        if let Some(dirs) = p.parent() {
            std::fs::create_dir_all(dirs)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let line_buffer = LineWriter::new(file);

        Ok(Self { line_buffer })
    }

    fn log(&mut self, data: &str) {
        if let Err(e) = writeln!(self.line_buffer, "{}", data) {
            log::warn!("Could not log or flush data: {}", e);
        }
    }
}

#[derive(Default)]
pub struct Stats {
    node_id: NodeID,
    logger: Option<Box<dyn StatsLogger + Send>>,
    data_sent: Wrapping<u32>,
    data_received: Wrapping<u32>,
    delivered: Wrapping<u32>,
    relayed: Wrapping<u32>,
    acks_sent: Wrapping<u32>,
    acks_forwarded: Wrapping<u32>,
    retransmissions: Wrapping<u32>,
    final_failures: Wrapping<u32>,
    duplicates: Wrapping<u32>,
    reconstructions: Wrapping<u32>,
    collisions: Wrapping<u32>,
    total_data_sent: Wrapping<u32>,
    total_data_delivered: Wrapping<u32>,
}

macro_rules! counter {
    ($($add:ident, $get:ident => $field:ident;)*) => {
        $(
            pub fn $add(&mut self) {
                self.$field += Wrapping(1);
            }

            pub fn $get(&self) -> u32 {
                self.$field.0
            }
        )*
    };
}

impl Stats {
    pub fn new(node_id: NodeID) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }

    /// Rows go to `logger` from now on, starting with the CSV header.
    pub fn attach_logger(&mut self, mut logger: Box<dyn StatsLogger + Send>) {
        logger.log(Self::file_header());
        self.logger = Some(logger);
    }

    fn file_header() -> &'static str {
        "time_us,node,data_sent,data_received,delivered,relayed,acks_sent,acks_forwarded,\
         retransmissions,final_failures,duplicates,reconstructions,collisions,\
         total_data_sent,total_data_delivered"
    }

    pub fn log_data(&mut self, now: Duration) {
        let formatted = format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            now.as_micros(),
            self.node_id,
            self.data_sent,
            self.data_received,
            self.delivered,
            self.relayed,
            self.acks_sent,
            self.acks_forwarded,
            self.retransmissions,
            self.final_failures,
            self.duplicates,
            self.reconstructions,
            self.collisions,
            self.total_data_sent,
            self.total_data_delivered
        );

        if let Some(logger) = self.logger.as_mut() {
            logger.log(&formatted);
        }
    }

    pub fn add_sent(&mut self, payload_size: usize) {
        self.data_sent += Wrapping(1);
        self.total_data_sent += Wrapping(payload_size as u32);
    }

    pub fn add_delivered(&mut self, payload_size: usize) {
        self.delivered += Wrapping(1);
        self.total_data_delivered += Wrapping(payload_size as u32);
    }

    counter! {
        add_received, data_received => data_received;
        add_relayed, relayed => relayed;
        add_ack_sent, acks_sent => acks_sent;
        add_ack_forwarded, acks_forwarded => acks_forwarded;
        add_retransmission, retransmissions => retransmissions;
        add_final_failure, final_failures => final_failures;
        add_duplicate, duplicates => duplicates;
        add_reconstruction, reconstructions => reconstructions;
        add_collision, collisions => collisions;
    }

    pub fn data_sent(&self) -> u32 {
        self.data_sent.0
    }

    pub fn delivered(&self) -> u32 {
        self.delivered.0
    }
}
