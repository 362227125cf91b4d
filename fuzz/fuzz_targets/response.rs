#![no_main]

use hvmobile::response::ResponseResult;
use hvmobile::xml;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = std::str::from_utf8(data) {
        let _ = xml::parse_fragment(body);
        let _ = ResponseResult::parse("Fuzz", body.to_string()).info_node();

        // The same input buried under nesting proportional to its length.
        let depth = data.len() * 8;
        let nested = format!("{}{body}{}", "<a>".repeat(depth), "</a>".repeat(depth));
        let _ = xml::parse(&nested);
    }
});
