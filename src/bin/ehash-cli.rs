use std::path::PathBuf;

use ehash_index::{EhashConfig, EhashIndex};

fn main() {
    pretty_env_logger::init();

    let dir_path = PathBuf::from("index.ehashdir");
    let hash_path = PathBuf::from("index.ehash");

    let config = EhashConfig::new(/* global_depth_max */ 16, /* block_size */ 256, /* key_width */ 8)
        .expect("configuration should validate");
    let mut index = EhashIndex::open(&dir_path, &hash_path, config).expect("failed to open index");

    for i in 0u64..100_000 {
        let key = i.to_le_bytes();
        if let Err(e) = index.insert(&key, i * 2) {
            println!("insert error at key {i}: {e}");
            break;
        }
    }

    match index.search(&0u64.to_le_bytes()) {
        Ok(refs) if refs.is_empty() => println!("key 0 not found"),
        Ok(refs) => println!("key 0 -> record_ref(s) {refs:?}"),
        Err(e) => println!("search error: {e}"),
    }
}
