/// Telemetry reports (`T#`): a sequence counter, five analog channels and
/// eight digital bits.
use serde::Serialize;

use super::AprsError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryReport {
    /// Sequence number 0..=999; Mic-E telemetry sends `MIC` instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u16>,
    pub analog: [Option<f64>; 5],
    pub digital: [bool; 8],
}

impl TelemetryReport {
    pub(crate) fn decode(body: &[u8]) -> Result<Self, AprsError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| AprsError::Truncated { expected: 2 })?;
        let rest = text
            .strip_prefix('#')
            .ok_or(AprsError::Truncated { expected: 2 })?;

        let mut parts = rest.split(',');
        let sequence = match parts.next() {
            Some("MIC") => None,
            Some(seq) => Some(
                seq.trim()
                    .parse()
                    .map_err(|_| AprsError::Truncated { expected: 5 })?,
            ),
            None => return Err(AprsError::Truncated { expected: 5 }),
        };

        let mut analog = [None; 5];
        for slot in analog.iter_mut() {
            let Some(value) = parts.next() else { break };
            *slot = value.trim().parse().ok();
        }

        let mut digital = [false; 8];
        if let Some(bits) = parts.next() {
            for (i, c) in bits.trim().chars().take(8).enumerate() {
                digital[i] = c == '1';
            }
        }

        Ok(TelemetryReport { sequence, analog, digital })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_report() {
        let report = TelemetryReport::decode(
            b"#005,199,000,255,073,123,01101001",
        )
        .unwrap();
        assert_eq!(report.sequence, Some(5));
        assert_eq!(report.analog[0], Some(199.0));
        assert_eq!(report.analog[4], Some(123.0));
        assert_eq!(
            report.digital,
            [false, true, true, false, true, false, false, true]
        );
    }

    #[test]
    fn mic_sequence() {
        let report =
            TelemetryReport::decode(b"#MIC,199,000,255,073,123,00000000")
                .unwrap();
        assert_eq!(report.sequence, None);
    }

    #[test]
    fn partial_channels() {
        let report = TelemetryReport::decode(b"#010,123").unwrap();
        assert_eq!(report.analog[0], Some(123.0));
        assert_eq!(report.analog[1], None);
    }

    #[test]
    fn not_telemetry() {
        assert!(TelemetryReport::decode(b"his is just a status").is_err());
    }
}
