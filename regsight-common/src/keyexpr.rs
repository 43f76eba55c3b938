/// Default key expression prefix for Modbus sensor state.
pub const KEY_PREFIX: &str = "regsight/modbus";

/// Builder for sensor key expressions.
///
/// Key expressions follow the pattern:
/// `<prefix>/<hub>/<sensor>`
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder with the given prefix. Trailing slashes are dropped.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { prefix }
    }

    /// The prefix this builder was created with.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key expression a sensor's state is published on.
    ///
    /// # Example
    /// ```
    /// use regsight_common::keyexpr::KeyExprBuilder;
    ///
    /// let key = KeyExprBuilder::default().sensor("hub1", "boiler_temp");
    /// assert_eq!(key, "regsight/modbus/hub1/boiler_temp");
    /// ```
    pub fn sensor(&self, hub: &str, sensor: &str) -> String {
        format!("{}/{}/{}", self.prefix, hub, sensor)
    }

    /// Wildcard for every sensor behind one hub.
    pub fn hub_wildcard(&self, hub: &str) -> String {
        format!("{}/{}/*", self.prefix, hub)
    }

    /// Wildcard for every sensor of every hub.
    pub fn all_sensors_wildcard(&self) -> String {
        format!("{}/**", self.prefix)
    }

    /// Build the bridge status key.
    ///
    /// # Example
    /// ```
    /// use regsight_common::keyexpr::KeyExprBuilder;
    ///
    /// assert_eq!(KeyExprBuilder::default().status_key(), "regsight/modbus/@/status");
    /// ```
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Split a sensor key back into hub and sensor name.
    ///
    /// Returns `None` for keys outside the prefix, status keys, or keys with
    /// the wrong number of segments.
    pub fn parse<'a>(&self, key: &'a str) -> Option<ParsedKeyExpr<'a>> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let (hub, sensor) = rest.split_once('/')?;

        if hub.is_empty() || hub == "@" || sensor.is_empty() || sensor.contains('/') {
            return None;
        }

        Some(ParsedKeyExpr { hub, sensor })
    }
}

/// Parsed components of a sensor key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr<'a> {
    pub hub: &'a str,
    pub sensor: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builder() {
        let builder = KeyExprBuilder::default();

        assert_eq!(
            builder.sensor("plant", "inlet_pressure"),
            "regsight/modbus/plant/inlet_pressure"
        );
        assert_eq!(builder.hub_wildcard("plant"), "regsight/modbus/plant/*");
        assert_eq!(builder.all_sensors_wildcard(), "regsight/modbus/**");
        assert_eq!(builder.status_key(), "regsight/modbus/@/status");
    }

    #[test]
    fn test_custom_prefix_trailing_slash() {
        let builder = KeyExprBuilder::new("site/a/");
        assert_eq!(builder.prefix(), "site/a");
        assert_eq!(builder.sensor("h", "s"), "site/a/h/s");
    }

    #[test]
    fn test_parse_key_expr() {
        let builder = KeyExprBuilder::default();
        let parsed = builder.parse("regsight/modbus/plant/inlet_pressure").unwrap();

        assert_eq!(parsed.hub, "plant");
        assert_eq!(parsed.sensor, "inlet_pressure");
    }

    #[test]
    fn test_parse_invalid_key() {
        let builder = KeyExprBuilder::default();

        assert!(builder.parse("invalid/key").is_none());
        assert!(builder.parse("regsight/modbus/@/status").is_none());
        assert!(builder.parse("regsight/modbus/plant").is_none());
        assert!(builder.parse("regsight/modbus/plant/a/b").is_none());
        assert!(builder.parse("regsight/modbusx/plant/a").is_none());
    }
}
