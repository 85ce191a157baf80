use chrono::{DateTime, Utc};

pub const PACKET_LEN: usize = 48;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// LI = 0, VN = 3, Mode = 3 (client).
const CLIENT_FIRST_BYTE: u8 = 0x1B;
const STRATUM_OFFSET: usize = 1;
const TRANSMIT_OFFSET: usize = 40;

/// 32.32 fixed-point timestamp counted from 1900.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpTimestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimestamp {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            seconds: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            fraction: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.seconds.to_be_bytes());
        out[4..].copy_from_slice(&self.fraction.to_be_bytes());
        out
    }

    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let seconds = (time.timestamp() + NTP_UNIX_OFFSET) as u32;
        let fraction = ((u64::from(time.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds, fraction }
    }

    pub fn is_zero(self) -> bool {
        self.seconds == 0 && self.fraction == 0
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let unix_seconds = i64::from(self.seconds) - NTP_UNIX_OFFSET;
        let nanos = ((u64::from(self.fraction) * 1_000_000_000) >> 32) as u32;
        DateTime::<Utc>::from_timestamp(unix_seconds, nanos)
    }
}

/// Fields read from a server reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NtpReply {
    pub stratum: u8,
    pub transmit: NtpTimestamp,
}

impl NtpReply {
    /// Server transmit time minus the local clock at receipt.
    pub fn offset_from(&self, received_at: DateTime<Utc>) -> Option<chrono::Duration> {
        self.transmit
            .to_datetime()
            .map(|server_time| server_time - received_at)
    }
}

pub fn build_client_request() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = CLIENT_FIRST_BYTE;
    packet
}

/// Returns `None` for replies shorter than a full 48-byte frame and for
/// replies without a transmit time (kiss-o'-death, unsynchronised servers).
pub fn parse_reply(reply: &[u8]) -> Option<NtpReply> {
    if reply.len() < PACKET_LEN {
        return None;
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&reply[TRANSMIT_OFFSET..TRANSMIT_OFFSET + 8]);
    let transmit = NtpTimestamp::from_bytes(ts);
    if transmit.is_zero() {
        return None;
    }
    Some(NtpReply {
        stratum: reply[STRATUM_OFFSET],
        transmit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture(stratum: u8, transmit: NtpTimestamp) -> Vec<u8> {
        let mut reply = vec![0u8; PACKET_LEN];
        reply[0] = 0x1C;
        reply[1] = stratum;
        reply[TRANSMIT_OFFSET..TRANSMIT_OFFSET + 8].copy_from_slice(&transmit.to_bytes());
        reply
    }

    #[test]
    fn request_is_mode_three_and_otherwise_zero() {
        let packet = build_client_request();
        assert_eq!(packet.len(), 48);
        assert_eq!(packet[0] & 0x07, 3);
        assert!(packet[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn epoch_conversion_matches_known_instant() {
        // 2024-01-01T00:00:00Z
        let ts = NtpTimestamp {
            seconds: 3_913_056_000,
            fraction: 0x8000_0000,
        };
        let time = ts.to_datetime().unwrap();
        assert_eq!(time.timestamp(), 1_704_067_200);
        assert_eq!(time.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn offset_is_server_minus_local() {
        let captured_now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let server_time = captured_now + chrono::Duration::milliseconds(1_250);
        let reply = parse_reply(&fixture(2, NtpTimestamp::from_datetime(server_time))).unwrap();

        assert_eq!(reply.stratum, 2);
        let offset = reply.offset_from(captured_now).unwrap();
        assert!((offset - chrono::Duration::milliseconds(1_250)).num_milliseconds().abs() <= 1);
    }

    #[test]
    fn short_reply_is_rejected() {
        assert!(parse_reply(&[0u8; 47]).is_none());
    }

    #[test]
    fn zero_transmit_time_is_rejected() {
        let unset = NtpTimestamp { seconds: 0, fraction: 0 };
        assert!(parse_reply(&fixture(0, unset)).is_none());
    }
}
