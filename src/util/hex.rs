//! Hex formatting utilities.

/// Format a byte offset as "decimal (0xhex)".
pub fn format_offset(offset: u64) -> String {
    format!("{} (0x{:x})", offset, offset)
}

/// Format bytes as a compact lowercase hex string (e.g., "4a2f00ff").
pub fn format_bytes(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Format at most `max` bytes as hex, marking the cut with the total length.
pub fn format_bytes_preview(data: &[u8], max: usize) -> String {
    if data.len() <= max {
        format_bytes(data)
    } else {
        format!("{}... ({} bytes)", format_bytes(&data[..max]), data.len())
    }
}
