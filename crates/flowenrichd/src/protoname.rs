//! Well-known IP protocol names.

use flow_types::FlowRecord;

/// Returns the name of a well-known IP protocol number, or `""`.
pub fn proto_name(proto: u32) -> &'static str {
    match proto {
        1 => "ICMP",
        4 => "IPv4",
        6 => "TCP",
        17 => "UDP",
        50 => "ESP",
        _ => "",
    }
}

/// Sets `proto_name` from `proto`.
pub fn apply(record: &mut FlowRecord) {
    record.proto_name = proto_name(record.proto).to_string();
}
