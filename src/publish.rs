use crate::error::PublishError;

/// Description of the outward stream, fixed when the outlet is created.
#[derive(Clone, Debug, PartialEq)]
pub struct OutletInfo {
    pub name: String,
    pub stream_type: String,
    pub source_id: String,
    pub nominal_rate_hz: f64,
    pub channel_label: String,
    pub channel_unit: String,
    pub channel_type: String,
}

impl OutletInfo {
    pub fn ecg(name: &str, source_id: &str, sample_rate_hz: u32) -> Self {
        Self {
            name: name.to_string(),
            stream_type: "ECG".to_string(),
            source_id: source_id.to_string(),
            nominal_rate_hz: sample_rate_hz as f64,
            channel_label: "ECG".to_string(),
            channel_unit: "uV".to_string(),
            channel_type: "ECG".to_string(),
        }
    }

    /// Single channel, 32-bit float samples.
    pub const CHANNEL_COUNT: u32 = 1;
}

/// Outward real-time channel. Called once per accepted sample, right after
/// it is buffered.
pub trait Publisher: Send {
    fn publish(&mut self, value: f32, timestamp: f64) -> Result<(), PublishError>;
}

/// Stand-in outlet used when no streaming transport is compiled in. Declares
/// the stream in the log and traces every sample.
pub struct LogPublisher {
    name: String,
}

impl LogPublisher {
    pub fn new(info: &OutletInfo) -> Self {
        log::info!(
            "Stream started: {} (type {}, {} ch float32 @ {} Hz, source {}, channel {} [{}])",
            info.name,
            info.stream_type,
            OutletInfo::CHANNEL_COUNT,
            info.nominal_rate_hz,
            info.source_id,
            info.channel_label,
            info.channel_unit,
        );
        Self {
            name: info.name.clone(),
        }
    }
}

impl Publisher for LogPublisher {
    fn publish(&mut self, value: f32, timestamp: f64) -> Result<(), PublishError> {
        log::trace!("{} t={timestamp:.6} {value}", self.name);
        Ok(())
    }
}

#[cfg(feature = "lsl")]
pub use self::lsl_outlet::LslPublisher;

#[cfg(feature = "lsl")]
mod lsl_outlet {
    use lsl::ExPushable;

    use super::{OutletInfo, Publisher};
    use crate::error::PublishError;

    // Seconds of data liblsl keeps for slow consumers.
    const MAX_BUFFERED_SECONDS: i32 = 360;

    /// Lab Streaming Layer outlet carrying one float32 channel.
    pub struct LslPublisher {
        outlet: lsl::StreamOutlet,
        frame: Vec<f32>,
    }

    impl LslPublisher {
        pub fn new(info: &OutletInfo) -> Result<Self, PublishError> {
            let create_err = |err: lsl::Error| PublishError::Create {
                name: info.name.clone(),
                message: format!("{err:?}"),
            };
            let mut stream_info = lsl::StreamInfo::new(
                &info.name,
                &info.stream_type,
                OutletInfo::CHANNEL_COUNT,
                info.nominal_rate_hz,
                lsl::ChannelFormat::Float32,
                &info.source_id,
            )
            .map_err(create_err)?;

            let mut channels = stream_info.desc().append_child("channels");
            channels
                .append_child("channel")
                .append_child_value("label", &info.channel_label)
                .append_child_value("unit", &info.channel_unit)
                .append_child_value("type", &info.channel_type);

            let outlet =
                lsl::StreamOutlet::new(&stream_info, 0, MAX_BUFFERED_SECONDS).map_err(create_err)?;
            log::info!("LSL stream started: {}", info.name);
            Ok(Self {
                outlet,
                frame: vec![0.0],
            })
        }
    }

    impl Publisher for LslPublisher {
        fn publish(&mut self, value: f32, timestamp: f64) -> Result<(), PublishError> {
            self.frame[0] = value;
            self.outlet
                .push_sample_ex(&self.frame, timestamp, true)
                .map_err(|err| PublishError::Rejected(format!("{err:?}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecg_outlet_defaults() {
        let info = OutletInfo::ecg("ECG_Stream", "ecg_serial_001", 1000);
        assert_eq!(info.name, "ECG_Stream");
        assert_eq!(info.stream_type, "ECG");
        assert_eq!(info.nominal_rate_hz, 1000.0);
        assert_eq!(info.channel_label, "ECG");
        assert_eq!(info.channel_unit, "uV");
        assert_eq!(info.channel_type, "ECG");
    }

    #[test]
    fn log_publisher_accepts_everything() {
        let mut publisher = LogPublisher::new(&OutletInfo::ecg("ECG_Stream", "id", 250));
        for i in 0..10 {
            assert!(publisher.publish(i as f32, i as f64 / 250.0).is_ok());
        }
    }
}
