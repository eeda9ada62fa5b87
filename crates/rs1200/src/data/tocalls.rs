/**
 * Device identification from the AX.25 destination address.
 *
 * APRS software encodes its identity in the destination callsign
 * ("tocall", `APxxxx`), with vendors allocated prefixes of varying
 * length. The longest matching prefix wins: `APK004` is a TH-D74,
 * anything else under `APK0` is an older Kenwood firmware.
 *
 * Mic-E transmitters are identified differently, by one comment prefix
 * byte (Kenwood) or a two-byte comment suffix (Yaesu and most trackers).
 *
 * This table follows the structure of the community tocall registry; the
 * registry itself is refreshed from time to time without code changes.
 */

#[derive(Debug, PartialEq, Eq)]
pub struct Device {
    pub prefix: &'static str,
    pub vendor: &'static str,
    pub model: &'static str,
}

#[rustfmt::skip]
static TOCALLS: &[Device] = &[
    Device { prefix: "AP1WWX", vendor: "TAPR", model: "T-238+ WX station" },
    Device { prefix: "AP4R",   vendor: "Open Source", model: "APRS4R" },
    Device { prefix: "APAF",   vendor: "AFilter", model: "AFilter" },
    Device { prefix: "APAG",   vendor: "AGate", model: "AGate" },
    Device { prefix: "APAGW",  vendor: "SV2AGW", model: "AGWtracker" },
    Device { prefix: "APAL",   vendor: "Alinco", model: "DR-135 EJ-41U" },
    Device { prefix: "APAM",   vendor: "Altus Metrum", model: "AltOS" },
    Device { prefix: "APAND",  vendor: "Open Source", model: "APRSdroid" },
    Device { prefix: "APAT51", vendor: "Anytone", model: "AT-D578" },
    Device { prefix: "APAT81", vendor: "Anytone", model: "AT-D878" },
    Device { prefix: "APAVT5", vendor: "SainSonic", model: "AP510" },
    Device { prefix: "APAW",   vendor: "SV2AGW", model: "AGWPE" },
    Device { prefix: "APB2MF", vendor: "DL2MF", model: "MF2APRS" },
    Device { prefix: "APBL",   vendor: "BigRedBee", model: "BeeLine GPS" },
    Device { prefix: "APBM",   vendor: "BrandMeister", model: "DMR gateway" },
    Device { prefix: "APBPQ",  vendor: "John Wiseman", model: "BPQ32" },
    Device { prefix: "APBT62", vendor: "BTech", model: "DMR 6x2" },
    Device { prefix: "APC",    vendor: "Rob Wittner", model: "APRS/CE" },
    Device { prefix: "APCDS0", vendor: "Leon Lessing", model: "ZS6LMG cell tracker" },
    Device { prefix: "APCLEY", vendor: "EYTraker", model: "GPS tracker" },
    Device { prefix: "APCLWX", vendor: "EYWeather", model: "WX station" },
    Device { prefix: "APCN",   vendor: "Carnet", model: "Carnet" },
    Device { prefix: "APDG",   vendor: "Jonathan G4KLX", model: "D-Star gateway" },
    Device { prefix: "APDI",   vendor: "Bela HA5DI", model: "DIXPRS" },
    Device { prefix: "APDPRS", vendor: "D-Star", model: "D-Star originated" },
    Device { prefix: "APDR",   vendor: "Open Source", model: "APRSdroid" },
    Device { prefix: "APDS",   vendor: "SP9UOB", model: "dsDIGI" },
    Device { prefix: "APDT",   vendor: "unknown", model: "APRStouch Tone DTMF" },
    Device { prefix: "APDW",   vendor: "WB2OSZ", model: "Dire Wolf" },
    Device { prefix: "APD",    vendor: "Open Source", model: "aprsd server" },
    Device { prefix: "APE",    vendor: "unknown", model: "Telemetry devices" },
    Device { prefix: "APECAN", vendor: "KT5TK/DL7AD", model: "Pecan Pico balloon" },
    Device { prefix: "APELK",  vendor: "WB8ELK", model: "Balloon tracker" },
    Device { prefix: "APERXQ", vendor: "PE1RXQ", model: "PE1RXQ tracker" },
    Device { prefix: "APESP",  vendor: "LY3PH", model: "APRS-ESP" },
    Device { prefix: "APFG",   vendor: "KP4DJT", model: "Flood gauge" },
    Device { prefix: "APFII",  vendor: "aprs.fi", model: "iPhone app" },
    Device { prefix: "APGBLN", vendor: "NW5W", model: "GoBalloon" },
    Device { prefix: "APGO",   vendor: "AA3NJ", model: "APRS-Go" },
    Device { prefix: "APHAX",  vendor: "PY2UEP", model: "SM2APRS SoundModem" },
    Device { prefix: "APHBL",  vendor: "KF7EEL", model: "HBLink D-APRS gateway" },
    Device { prefix: "APHK",   vendor: "LA1BR", model: "Digipeater/tracker" },
    Device { prefix: "APIC",   vendor: "HA9MCQ", model: "PICiGATE" },
    Device { prefix: "APIN",   vendor: "unknown", model: "PinPoint" },
    Device { prefix: "APJ8",   vendor: "JS8Call", model: "JS8Call" },
    Device { prefix: "APJA",   vendor: "K4HG/AE5PL", model: "JavAPRS" },
    Device { prefix: "APJI",   vendor: "Peter Loveall AE5PL", model: "jAPRSIgate" },
    Device { prefix: "APJS",   vendor: "Peter Loveall AE5PL", model: "javAPRSSrvr" },
    Device { prefix: "APJY",   vendor: "KA2DDO", model: "YAAC" },
    Device { prefix: "APK003", vendor: "Kenwood", model: "TH-D72" },
    Device { prefix: "APK004", vendor: "Kenwood", model: "TH-D74" },
    Device { prefix: "APK005", vendor: "Kenwood", model: "TH-D75" },
    Device { prefix: "APK0",   vendor: "Kenwood", model: "TH-D7" },
    Device { prefix: "APK1",   vendor: "Kenwood", model: "TM-D700" },
    Device { prefix: "APK5",   vendor: "Kenwood", model: "TM-D710" },
    Device { prefix: "APLC",   vendor: "DL3DCW", model: "APRScube" },
    Device { prefix: "APLG",   vendor: "OE5BPA", model: "LoRa gateway" },
    Device { prefix: "APLIG",  vendor: "TA2MUN/TA9OHC", model: "LightAPRS tracker" },
    Device { prefix: "APLO",   vendor: "SQ9MDD", model: "LoRa KISS TNC" },
    Device { prefix: "APLRG",  vendor: "CA2RXU", model: "LoRa gateway" },
    Device { prefix: "APLRT",  vendor: "CA2RXU", model: "LoRa tracker" },
    Device { prefix: "APLT",   vendor: "OE5BPA", model: "LoRa tracker" },
    Device { prefix: "APMG",   vendor: "Alex AB0TJ", model: "PiCrumbs/MiniGate" },
    Device { prefix: "APMI01", vendor: "Microsat", model: "WX3in1" },
    Device { prefix: "APMI02", vendor: "Microsat", model: "WXEth" },
    Device { prefix: "APMI03", vendor: "Microsat", model: "PLXTracker" },
    Device { prefix: "APMI04", vendor: "Microsat", model: "WX3in1 Plus" },
    Device { prefix: "APMI05", vendor: "Microsat", model: "PLXDigi" },
    Device { prefix: "APMI06", vendor: "Microsat", model: "WX3in1 Mini" },
    Device { prefix: "APMI",   vendor: "Microsat", model: "Microsat device" },
    Device { prefix: "APMT",   vendor: "LZ1PPL", model: "Micro tracker" },
    Device { prefix: "APN3",   vendor: "Kantronics", model: "KPC-3" },
    Device { prefix: "APN9",   vendor: "Kantronics", model: "KPC-9612" },
    Device { prefix: "APND",   vendor: "PE1MEW", model: "DIGI_NED" },
    Device { prefix: "APNK01", vendor: "Kenwood", model: "TM-D700 (NET)" },
    Device { prefix: "APNK80", vendor: "Kantronics", model: "KAM" },
    Device { prefix: "APNKMP", vendor: "Kantronics", model: "KAM+" },
    Device { prefix: "APNM",   vendor: "MFJ", model: "TNC" },
    Device { prefix: "APNP",   vendor: "PacComm", model: "TNC" },
    Device { prefix: "APNT",   vendor: "SV2AGW", model: "TNT TNC as digipeater" },
    Device { prefix: "APNU",   vendor: "IW3FQG", model: "UIdigi" },
    Device { prefix: "APNW",   vendor: "SQ3FYK", model: "WX3in1" },
    Device { prefix: "APNX",   vendor: "K6DBG", model: "TNC-X" },
    Device { prefix: "APOA",   vendor: "OpenAPRS", model: "iPhone app" },
    Device { prefix: "APOG",   vendor: "OpenGroundStation", model: "OpenGroundStation" },
    Device { prefix: "APOLU",  vendor: "AMSAT-LU", model: "Oscar satellite" },
    Device { prefix: "APOT",   vendor: "Argent Data", model: "OpenTracker" },
    Device { prefix: "APOZ",   vendor: "OZ1EKD/OZ7HVO", model: "KissOZ tracker" },
    Device { prefix: "APP6",   vendor: "unknown", model: "APRSlib" },
    Device { prefix: "APPIC",  vendor: "DB1NTO", model: "PicoAPRS" },
    Device { prefix: "APPT",   vendor: "JF6LZE", model: "KetaiTracker" },
    Device { prefix: "APR2MF", vendor: "DL2MF", model: "MF2wxAPRS gateway" },
    Device { prefix: "APRHH",  vendor: "Steven D. Bragg", model: "HamHud" },
    Device { prefix: "APRRT",  vendor: "RPC Electronics", model: "RTrak" },
    Device { prefix: "APRX",   vendor: "Open Source", model: "Aprx iGate" },
    Device { prefix: "APRS",   vendor: "unknown", model: "Generic APRS" },
    Device { prefix: "APS",    vendor: "Brent Hildebrand", model: "APRS+SA" },
    Device { prefix: "APSAR",  vendor: "ZL4FOX", model: "SARTrack" },
    Device { prefix: "APSC",   vendor: "OH2MQK/OH7LZB", model: "aprsc server" },
    Device { prefix: "APSK63", vendor: "Chris Moulding G4HYG", model: "APRS Messenger PSK-63" },
    Device { prefix: "APT2",   vendor: "Byonics", model: "TinyTrak2" },
    Device { prefix: "APT3",   vendor: "Byonics", model: "TinyTrak3" },
    Device { prefix: "APT4",   vendor: "Byonics", model: "TinyTrak4" },
    Device { prefix: "APTB",   vendor: "BG5HHP", model: "TinyAPRS" },
    Device { prefix: "APTCMA", vendor: "CAPI", model: "tracker" },
    Device { prefix: "APTIGR", vendor: "TigerTrak", model: "TigerTrak" },
    Device { prefix: "APTKPT", vendor: "TrackPoint", model: "TrackPoint" },
    Device { prefix: "APTT",   vendor: "Byonics", model: "TinyTrak" },
    Device { prefix: "APU1",   vendor: "Roger Barker G4IDE", model: "UI-View 16-bit" },
    Device { prefix: "APU2",   vendor: "Roger Barker G4IDE", model: "UI-View32" },
    Device { prefix: "APUDR",  vendor: "NW Digital Radio", model: "UDR" },
    Device { prefix: "APVE",   vendor: "unknown", model: "EchoLink" },
    Device { prefix: "APVR",   vendor: "unknown", model: "IRLP" },
    Device { prefix: "APW",    vendor: "Sproul Brothers", model: "WinAPRS" },
    Device { prefix: "APWA",   vendor: "Sproul Brothers", model: "WinAPRS Android" },
    Device { prefix: "APWEE",  vendor: "Wee trak", model: "Wee trak" },
    Device { prefix: "APWM",   vendor: "Sproul Brothers", model: "WinAPRS Mac" },
    Device { prefix: "APWW",   vendor: "KJ4ERJ", model: "APRSISCE/32" },
    Device { prefix: "APX",    vendor: "Open Source", model: "Xastir" },
    Device { prefix: "APY008", vendor: "Yaesu", model: "VX-8" },
    Device { prefix: "APY01D", vendor: "Yaesu", model: "FT1D" },
    Device { prefix: "APY02D", vendor: "Yaesu", model: "FT2D" },
    Device { prefix: "APY03D", vendor: "Yaesu", model: "FT3D" },
    Device { prefix: "APY05D", vendor: "Yaesu", model: "FT5D" },
    Device { prefix: "APY100", vendor: "Yaesu", model: "FTM-100D" },
    Device { prefix: "APY300", vendor: "Yaesu", model: "FTM-300D" },
    Device { prefix: "APY350", vendor: "Yaesu", model: "FTM-350" },
    Device { prefix: "APY400", vendor: "Yaesu", model: "FTM-400D" },
    Device { prefix: "APY",    vendor: "Yaesu", model: "Yaesu radio" },
    Device { prefix: "APZ18",  vendor: "IW3FQG", model: "UIdigi (experimental)" },
    Device { prefix: "APZMDR", vendor: "Open Source", model: "HamHUD" },
    Device { prefix: "APZ",    vendor: "unknown", model: "Experimental" },
];

/// Longest-prefix lookup of the destination callsign base.
pub fn device_for_tocall(destination: &str) -> Option<&'static Device> {
    TOCALLS
        .iter()
        .filter(|device| destination.starts_with(device.prefix))
        .max_by_key(|device| device.prefix.len())
}

/// Kenwood Mic-E radios announce themselves with one comment prefix byte.
pub fn mice_prefix_device(c: char) -> Option<&'static str> {
    match c {
        '>' => Some("Kenwood TH-D7"),
        ']' => Some("Kenwood TM-D700"),
        _ => None,
    }
}

/// Most other Mic-E transmitters append a two-byte suffix to the comment.
/// Returns the device name and the comment with the suffix removed.
pub fn mice_suffix_device(comment: &str) -> Option<(&'static str, String)> {
    let suffixes: &[(&str, &str)] = &[
        ("_ ", "Yaesu VX-8"),
        ("_\"", "Yaesu FTM-350"),
        ("_#", "Yaesu VX-8G"),
        ("_$", "Yaesu FT1D"),
        ("_%", "Yaesu FTM-400DR"),
        ("_(", "Yaesu FT2D"),
        ("_)", "Yaesu FTM-100D"),
        ("_0", "Yaesu FT3D"),
        ("_1", "Yaesu FT5D"),
        ("_3", "Yaesu FTM-300D"),
        ("^v", "HinzTec anyfrog"),
        ("*v", "KissOZ"),
        (":4", "SCS GmbH & Co. P4dragon DR-7400"),
        (":8", "SCS GmbH & Co. P4dragon DR-7800"),
        ("~v", "Other Mic-E"),
    ];
    for (suffix, device) in suffixes {
        if let Some(trimmed) = comment.strip_suffix(suffix) {
            return Some((device, trimmed.to_string()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(device_for_tocall("APK004").unwrap().model, "TH-D74");
        assert_eq!(device_for_tocall("APK022").unwrap().model, "TH-D7");
        assert_eq!(device_for_tocall("APK102").unwrap().model, "TM-D700");
    }

    #[test]
    fn generic_and_unknown() {
        assert_eq!(
            device_for_tocall("APRS").unwrap().model,
            "Generic APRS"
        );
        assert!(device_for_tocall("N0CALL").is_none());
    }

    #[test]
    fn mice_suffixes() {
        let (device, trimmed) =
            mice_suffix_device("hello from the hill_%").unwrap();
        assert_eq!(device, "Yaesu FTM-400DR");
        assert_eq!(trimmed, "hello from the hill");
        assert!(mice_suffix_device("no suffix here").is_none());
    }
}
