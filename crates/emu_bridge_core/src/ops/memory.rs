use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use super::{addr, hex};
use crate::dispatch::Context;
use crate::registry::{CommandSpec, ParamSpec, Registry};
use crate::validate::{ParamKind, Params, MAX_ADDRESS};
use crate::{BridgeError, Result};

/// Largest block a single READBLOCK may return.
const MAX_BLOCK: i64 = 0x10000;

pub(super) fn register(registry: &Registry) {
    registry.register(
        CommandSpec::new("READ", "Read one byte", |ctx, p| {
            ctx.bridge.require_running()?;
            let value = ctx.core().read_byte(p.addr("addr")?)?;
            Ok(json!(format!("0x{value:02X}")))
        })
        .param(addr("Address to read"))
        .example(json!({"type": "READ", "addr": "0x7E0020"})),
    );

    registry.register(
        CommandSpec::new("READ16", "Read a little-endian word", |ctx, p| {
            ctx.bridge.require_running()?;
            let value = read_word(ctx, p.addr("addr")?)?;
            Ok(json!(format!("0x{value:04X}")))
        })
        .param(addr("Address of the low byte"))
        .example(json!({"type": "READ16", "addr": "0x7E0020"})),
    );

    registry.register(
        CommandSpec::new("WRITE", "Write one byte", write)
            .param(addr("Address to write"))
            .param(ParamSpec::required(
                "value",
                ParamKind::Int,
                "Byte value, decimal or 0x-hex",
            ))
            .example(json!({"type": "WRITE", "addr": "0x7E0020", "value": "0x10"})),
    );

    registry.register(
        CommandSpec::new("WRITE16", "Write a little-endian word", write16)
            .param(addr("Address of the low byte"))
            .param(ParamSpec::required(
                "value",
                ParamKind::Int,
                "Word value, decimal or 0x-hex",
            ))
            .example(json!({"type": "WRITE16", "addr": "0x7E0020", "value": "0x1234"})),
    );

    registry.register(
        CommandSpec::new("READBLOCK", "Read a block as a hex string", |ctx, p| {
            let (start, bytes) = read_block(ctx, p, "len")?;
            let hex_bytes: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
            Ok(json!({ "addr": hex(start), "len": bytes.len(), "data": hex_bytes }))
        })
        .param(addr("First address"))
        .param(ParamSpec::required(
            "len",
            ParamKind::Int,
            "Bytes to read, at most 0x10000",
        ))
        .example(json!({"type": "READBLOCK", "addr": "0x7E0000", "len": "16"})),
    );

    registry.register(
        CommandSpec::new(
            "WRITEBLOCK",
            "Write a block given as a hex string; each byte is a separate memory write",
            write_block,
        )
        .param(addr("First address"))
        .param(ParamSpec::required(
            "data",
            ParamKind::Text,
            "Hex bytes, two digits each, at most 0x10000 bytes",
        ))
        .example(json!({"type": "WRITEBLOCK", "addr": "0x7E0100", "data": "DEADBEEF"})),
    );

    registry.register(
        CommandSpec::new(
            "READBLOCK_BINARY",
            "Read a block as base64",
            |ctx, p| {
                let (start, bytes) = read_block(ctx, p, "size")?;
                Ok(json!({
                    "addr": hex(start),
                    "size": bytes.len(),
                    "bytes": STANDARD.encode(&bytes),
                }))
            },
        )
        .param(addr("First address"))
        .param(ParamSpec::required(
            "size",
            ParamKind::Int,
            "Bytes to read, at most 0x10000",
        ))
        .example(json!({"type": "READBLOCK_BINARY", "addr": "0x7E0000", "size": "256"})),
    );
}

fn read_word(ctx: &Context<'_>, addr: u32) -> Result<u16> {
    if addr >= MAX_ADDRESS {
        return Err(BridgeError::invalid("addr", "word read past end of address space"));
    }
    let lo = ctx.core().read_byte(addr)?;
    let hi = ctx.core().read_byte(addr + 1)?;
    Ok(u16::from_le_bytes([lo, hi]))
}

fn write(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    ctx.bridge.require_running()?;
    let addr = params.addr("addr")?;
    let value = params.int_in("value", 0, 0xFF)? as u8;
    ctx.core().write_byte(addr, value)?;
    Ok(json!("OK"))
}

fn write16(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    ctx.bridge.require_running()?;
    let addr = params.addr("addr")?;
    if addr >= MAX_ADDRESS {
        return Err(BridgeError::invalid("addr", "word write past end of address space"));
    }
    let [lo, hi] = (params.int_in("value", 0, 0xFFFF)? as u16).to_le_bytes();
    ctx.core().write_byte(addr, lo)?;
    ctx.core().write_byte(addr + 1, hi)?;
    Ok(json!("OK"))
}

fn decode_hex(data: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = data.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(BridgeError::invalid("data", "expected an even, non-zero number of hex digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| BridgeError::invalid("data", "not a hex string"))
        })
        .collect()
}

fn write_block(ctx: &Context<'_>, params: &Params) -> Result<Value> {
    ctx.bridge.require_running()?;
    let start = params.addr("addr")?;
    let bytes = decode_hex(params.text("data")?)?;
    if bytes.len() > MAX_BLOCK as usize {
        return Err(BridgeError::invalid("data", "more than 0x10000 bytes"));
    }
    if u64::from(start) + bytes.len() as u64 > u64::from(MAX_ADDRESS) + 1 {
        return Err(BridgeError::invalid("data", "block runs past end of address space"));
    }
    for (offset, byte) in bytes.iter().enumerate() {
        ctx.core().write_byte(start + offset as u32, *byte)?;
    }
    Ok(json!({ "addr": hex(start), "len": bytes.len() }))
}

fn read_block(ctx: &Context<'_>, params: &Params, len_param: &str) -> Result<(u32, Vec<u8>)> {
    ctx.bridge.require_running()?;
    let start = params.addr("addr")?;
    let len = params.int_in(len_param, 1, MAX_BLOCK)? as u32;
    let end = u64::from(start) + u64::from(len);
    if end > u64::from(MAX_ADDRESS) + 1 {
        return Err(BridgeError::invalid(
            len_param,
            "block runs past end of address space",
        ));
    }
    let bytes = (start..start + len)
        .map(|a| ctx.core().read_byte(a))
        .collect::<Result<Vec<u8>>>()?;
    Ok((start, bytes))
}

#[cfg(test)]
mod tests {
    use crate::bridge::test_support::harness;
    use crate::{Command, ErrorCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;

    #[test]
    fn test_read_without_addr_is_missing_parameter() {
        let h = harness();
        let resp = h.bridge.dispatch_line(r#"{"type":"READ"}"#, None);
        assert!(!resp.success);
        assert_eq!(resp.error_code(), Some(ErrorCode::MissingParameter));
    }

    #[test]
    fn test_read_rejects_bad_address() {
        let h = harness();
        let resp = h
            .bridge
            .dispatch(&Command::new("READ").with_param("addr", "0xGG"), None);
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }

    #[test]
    fn test_write_then_read_formats() {
        let h = harness();
        let resp = h.bridge.dispatch(
            &Command::new("WRITE16")
                .with_param("addr", "7E0040")
                .with_param("value", "0x1234"),
            None,
        );
        assert_eq!(resp.data, Some(json!("OK")));

        let lo = h
            .bridge
            .dispatch(&Command::new("READ").with_param("addr", "$7E0040"), None);
        assert_eq!(lo.data, Some(json!("0x34")));
        let word = h
            .bridge
            .dispatch(&Command::new("READ16").with_param("addr", "0x7E0040"), None);
        assert_eq!(word.data, Some(json!("0x1234")));

        let resp = h.bridge.dispatch(
            &Command::new("WRITE")
                .with_param("addr", "0x7E0040")
                .with_param("value", "256"),
            None,
        );
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }

    #[test]
    fn test_readblock_hex_and_binary() {
        let h = harness();
        let data = h
            .bridge
            .dispatch(
                &Command::new("READBLOCK")
                    .with_param("addr", "0x008000")
                    .with_param("len", "4"),
                None,
            )
            .data
            .unwrap();
        assert_eq!(data["data"], "E230A900");

        let data = h
            .bridge
            .dispatch(
                &Command::new("READBLOCK_BINARY")
                    .with_param("addr", "0x008000")
                    .with_param("size", "2"),
                None,
            )
            .data
            .unwrap();
        assert_eq!(data["bytes"], STANDARD.encode([0xE2, 0x30]));
        assert_eq!(data["size"], 2);

        let resp = h.bridge.dispatch(
            &Command::new("READBLOCK")
                .with_param("addr", "0x0")
                .with_param("len", "0x10001"),
            None,
        );
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
        let resp = h.bridge.dispatch(
            &Command::new("READBLOCK")
                .with_param("addr", "0xFFFFFF")
                .with_param("len", "2"),
            None,
        );
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }

    #[test]
    fn test_writeblock_feeds_write_watches() {
        let h = harness();
        h.bridge.dispatch(
            &Command::new("MEM_WATCH_WRITES")
                .with_param("action", "add")
                .with_param("addr", "0x7E0100")
                .with_param("size", "4"),
            None,
        );
        let resp = h.bridge.dispatch(
            &Command::new("WRITEBLOCK")
                .with_param("addr", "0x7E0100")
                .with_param("data", "DEADbeef"),
            None,
        );
        assert_eq!(resp.data.unwrap()["len"], 4);

        let data = h
            .bridge
            .dispatch(
                &Command::new("READBLOCK")
                    .with_param("addr", "0x7E0100")
                    .with_param("len", "4"),
                None,
            )
            .data
            .unwrap();
        assert_eq!(data["data"], "DEADBEEF");

        let blame = h
            .bridge
            .dispatch(&Command::new("MEM_BLAME").with_param("addr", "0x7E0102"), None)
            .data
            .unwrap();
        assert_eq!(blame["log_count"], 4);
        assert_eq!(blame["writes"][0]["value"], 0xEF);
    }

    #[test]
    fn test_writeblock_rejects_bad_data() {
        let h = harness();
        for data in ["ABC", "", "ZZ"] {
            let resp = h.bridge.dispatch(
                &Command::new("WRITEBLOCK")
                    .with_param("addr", "0x7E0000")
                    .with_param("data", data),
                None,
            );
            assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue), "{data:?}");
        }
        let resp = h.bridge.dispatch(
            &Command::new("WRITEBLOCK")
                .with_param("addr", "0xFFFFFF")
                .with_param("data", "0102"),
            None,
        );
        assert_eq!(resp.error_code(), Some(ErrorCode::InvalidParameterValue));
    }
}
