use std::{fmt::Display, str::FromStr};

/// Hardware address, displayed in canonical lower-case colon-hex form (`aa:bb:cc:dd:ee:ff`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("invalid MAC address {value:?}")]
pub struct InvalidMacAddress {
    value: String,
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = InvalidMacAddress;

    //accepts aa:bb:cc:dd:ee:ff, AA-BB-CC-DD-EE-FF, a:b:c:d:e:f and aabbccddeeff
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidMacAddress {
            value: value.to_string(),
        };
        let trimmed = value.trim();

        let groups: Vec<&str> = if trimmed.contains(':') || trimmed.contains('-') {
            trimmed.split([':', '-']).collect()
        } else if trimmed.len() == 12 && trimmed.is_ascii() {
            (0..6).map(|i| &trimmed[i * 2..i * 2 + 2]).collect()
        } else {
            return Err(invalid());
        };

        if groups.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, group) in octets.iter_mut().zip(groups) {
            if group.is_empty() || group.len() > 2 || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(group, 16).map_err(|_| invalid())?;
        }

        Ok(Self(octets))
    }
}

impl serde::Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_canonical() {
        let mac: MacAddress = "AA-BB-0C-DD-EE-FF".parse().unwrap();

        assert_eq!(mac.to_string(), "aa:bb:0c:dd:ee:ff");
    }

    #[test]
    fn test_parse_short_groups() {
        let mac: MacAddress = "0:1a:2b:3c:4d:5e".parse().unwrap();

        assert_eq!(mac.to_string(), "00:1a:2b:3c:4d:5e");
    }

    #[test]
    fn test_parse_without_separator() {
        let mac: MacAddress = "001A2B3C4D5E".parse().unwrap();

        assert_eq!(mac.to_string(), "00:1a:2b:3c:4d:5e");
    }

    #[test]
    fn test_reject_invalid() {
        assert!("00:1a:2b:3c:4d".parse::<MacAddress>().is_err());
        assert!("00:1a:2b:3c:4d:zz".parse::<MacAddress>().is_err());
        assert!("00:1a:2b:3c:4d:5e:6f".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
        assert!("+0:1a:2b:3c:4d:5e".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_deserialize_from_config_value() {
        let mac: MacAddress = serde_json::from_str(r#""AA:BB:CC:DD:EE:FF""#).unwrap();

        assert_eq!(serde_json::to_string(&mac).unwrap(), r#""aa:bb:cc:dd:ee:ff""#);
    }
}
