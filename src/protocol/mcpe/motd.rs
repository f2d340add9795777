/// Protocol wise, the motd is just a string. This struct holds the
/// individual fields and renders them into the wire form.
#[derive(Debug, Clone)]
pub struct Motd {
    /// The name of the server
    pub name: String,
    /// The MCPE network protocol version
    pub protocol: u32,
    /// The human readable game version
    pub version: String,
    /// The number of players online
    pub player_count: u32,
    /// The maximum number of players
    pub player_max: u32,
}

impl Motd {
    pub fn new<S: Into<String>, V: Into<String>>(
        name: S,
        protocol: u32,
        version: V,
        player_max: u32,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            version: version.into(),
            player_count: 0,
            player_max,
        }
    }

    /// Renders the status string served to unconnected pings.
    pub fn write(&self) -> String {
        [
            "MCPE".to_string(),
            self.name.clone(),
            self.protocol.to_string(),
            self.version.clone(),
            self.player_count.to_string(),
            self.player_max.to_string(),
        ]
        .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_has_six_fields() {
        let motd = Motd::new("HighMC", 60, "0.14.2", 20);
        assert_eq!(motd.write(), "MCPE;HighMC;60;0.14.2;0;20");
    }
}
