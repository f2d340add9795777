/// Minecraft attaches a status string to the `UnconnectedPong` packet to
/// display information about the server in the server list.
pub mod motd;

/// Frames whose payload starts with this byte carry MCPE game packets.
/// They are handed to the application untouched once a session is
/// established.
pub const GAME_PACKET: u8 = 0x8e;
