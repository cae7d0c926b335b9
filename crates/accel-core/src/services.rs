//! QAT service-capability bitset.
//!
//! A physical function is configured with some subset of symmetric crypto,
//! asymmetric crypto, compression (`dc`) and chained compression (`dcc`).
//! Requests use the same type; [`Services::UNSET`] means "no requirement".

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Services(u32);

impl Services {
    pub const NONE: Services = Services(0);
    pub const SYM: Services = Services(1);
    pub const ASYM: Services = Services(1 << 1);
    pub const DC: Services = Services(1 << 2);
    pub const DCC: Services = Services(1 << 3);
    /// Request marker: any profile will do.
    pub const UNSET: Services = Services(1 << 31);

    const NAMED: [(Services, &'static str); 4] = [
        (Services::SYM, "sym"),
        (Services::ASYM, "asym"),
        (Services::DC, "dc"),
        (Services::DCC, "dcc"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Services(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Services::NONE
    }

    pub fn is_unset(self) -> bool {
        self == Services::UNSET
    }

    pub fn contains(self, other: Services) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether a function configured with `self` can serve `request`.
    ///
    /// An unset request is satisfied by anything, a `NONE` request only by
    /// an unconfigured function, anything else by a superset profile.
    pub fn supports(self, request: Services) -> bool {
        if request.is_unset() {
            return true;
        }
        if request.is_none() {
            return self.is_none();
        }
        if self.is_unset() {
            return false;
        }
        self.contains(request)
    }
}

impl BitOr for Services {
    type Output = Services;

    fn bitor(self, rhs: Services) -> Services {
        Services(self.0 | rhs.0)
    }
}

impl fmt::Display for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (bit, name) in Services::NAMED {
            if self.0 & bit.0 == 0 {
                continue;
            }
            if !first {
                f.write_str(";")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Services {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut services = Services::NONE;
        for token in s.split(';') {
            if token.is_empty() {
                continue;
            }
            let (bit, _) = Services::NAMED
                .iter()
                .find(|(_, name)| *name == token)
                .ok_or_else(|| CoreError::UnknownService(token.to_string()))?;
            services = services | *bit;
        }
        Ok(services)
    }
}

impl Serialize for Services {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Services {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_in_fixed_order() {
        assert_eq!(Services::NONE.to_string(), "");
        assert_eq!(Services::UNSET.to_string(), "");
        assert_eq!((Services::DC | Services::SYM).to_string(), "sym;dc");
        assert_eq!(Services::from_bits(0xffff).to_string(), "sym;asym;dc;dcc");
    }

    #[test]
    fn parse_tolerates_empty_tokens_and_duplicates() {
        assert_eq!("".parse::<Services>().unwrap(), Services::NONE);
        assert_eq!(";;;".parse::<Services>().unwrap(), Services::NONE);
        assert_eq!("sym;".parse::<Services>().unwrap(), Services::SYM);
        assert_eq!(
            "dc;sym;dc".parse::<Services>().unwrap(),
            Services::SYM | Services::DC
        );
    }

    #[test]
    fn parse_rejects_unknown_tokens() {
        assert!("   ".parse::<Services>().is_err());
        assert!("sym;foo".parse::<Services>().is_err());
        assert!("SYM".parse::<Services>().is_err());
    }

    #[test]
    fn supports_rules() {
        let sym_asym = Services::SYM | Services::ASYM;
        assert!(sym_asym.supports(Services::SYM));
        assert!(sym_asym.supports(Services::UNSET));
        assert!(!sym_asym.supports(Services::DC));
        assert!(!sym_asym.supports(Services::NONE));
        assert!(Services::NONE.supports(Services::NONE));
        assert!(Services::NONE.supports(Services::UNSET));
        assert!(!Services::NONE.supports(Services::SYM));
        assert!(!Services::UNSET.supports(Services::NONE));
        assert!(!(Services::DC | Services::DCC | Services::ASYM).supports(Services::NONE));
    }

    #[test]
    fn serde_uses_text_form() {
        let json = serde_json::to_string(&(Services::SYM | Services::ASYM)).unwrap();
        assert_eq!(json, "\"sym;asym\"");
        let back: Services = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Services::SYM | Services::ASYM);
    }
}
