#![no_main]
use libfuzzer_sys::fuzz_target;

use binmeta::config::PeOptions;
use binmeta::formats::pe::PeFile;

fuzz_target!(|data: &[u8]| {
    let options = PeOptions {
        overlay_limit: 1 << 20,
        max_section_data: 1 << 24,
        ..PeOptions::default()
    };
    if let Ok(pe) = PeFile::with_options(data, options) {
        let _ = pe.function_table();
        let _ = pe.symbols();
        let _ = pe.string_table_entries();
        let _ = pe.read_overlay();
        for section in pe.sections() {
            let _ = pe.rva_to_offset(section.virtual_address());
        }
    }
});
