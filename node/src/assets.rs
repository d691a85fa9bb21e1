use waterlevel_common::{AssetEntry, AssetTable};

include!(concat!(env!("OUT_DIR"), "/assets_generated.rs"));

pub fn bundled() -> AssetTable {
    AssetTable::new(ASSET_MANIFEST)
}

#[cfg(test)]
mod tests {
    use waterlevel_common::INDEX_ASSET;

    use super::*;

    #[test]
    fn bundles_frontend() {
        let table = bundled();

        let index = table.find(INDEX_ASSET).unwrap();
        assert_eq!(index.content_type(), "text/html");
        assert!(index.content().starts_with(b"<!doctype html>"));

        let script = table.find("main.js").unwrap();
        assert_eq!(script.content_type(), "text/javascript");
    }

    #[test]
    fn manifest_is_sorted_by_name() {
        let names: Vec<_> = bundled().iter().map(|entry| entry.name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
