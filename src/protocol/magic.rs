/// A unique byte string identifying offline (unconnected) RakNet traffic.
/// Every offline packet carries these 16 bytes after its id.
pub const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];
