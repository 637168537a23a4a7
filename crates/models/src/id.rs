/// RequestId is the identity of a TaskRequest, assigned by the request
/// authoring pipeline. The ready-queue entry of a request shares its
/// identity, as there is exactly one entry per request.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
    /// The zero id is reserved and never assigned to a request.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
    pub fn as_u64(&self) -> u64 {
        self.0
    }
    pub fn from_hex(hex: &str) -> Result<Self, std::num::ParseIntError> {
        u64::from_str_radix(hex, 16).map(Self)
    }
}

impl std::str::FromStr for RequestId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::fmt::Debug for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl serde::Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        format!("{self}").serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let str_val = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Self::from_hex(str_val.as_ref())
            .map_err(|err| D::Error::custom(format!("invalid request id: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::RequestId;

    #[test]
    fn test_hex_round_trip() {
        let id = RequestId::new(0x014350e868881200);
        assert_eq!(id.to_string(), "014350e868881200");
        assert_eq!(RequestId::from_hex("014350e868881200").unwrap(), id);
        assert_eq!("14350e868881200".parse::<RequestId>().unwrap(), id);

        assert!(RequestId::new(0).is_zero());
        assert!(!id.is_zero());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = RequestId::new(256);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0000000000000100\"");
        assert_eq!(serde_json::from_str::<RequestId>(&json).unwrap(), id);
    }
}
