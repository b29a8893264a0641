#![no_main]
use libfuzzer_sys::fuzz_target;

use binmeta::formats::zip::ZipArchive;

fuzz_target!(|data: &[u8]| {
    if let Ok(zip) = ZipArchive::open(data) {
        for entry in zip.entries() {
            let _ = zip.data_offset(entry);
            let _ = entry.aes_text();
        }
    }
});
