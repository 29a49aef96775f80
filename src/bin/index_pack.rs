use fieldsim::world::index_codec::write_index_file;
use fieldsim::world::map_data::MapMetadata;
use fieldsim::world::spatial_index::IndexSettings;
use std::path::Path;

fn pack(map_path: &Path, out_path: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(map_path)
        .map_err(|err| format!("read {} failed: {}", map_path.display(), err))?;
    let metadata = MapMetadata::parse(map_path, &text).map_err(|err| err.to_string())?;
    let map_id = map_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<i32>().ok())
        .unwrap_or(0);
    let index = metadata
        .build_index(map_id, IndexSettings::default())
        .map_err(|err| err.to_string())?;
    let fingerprint = write_index_file(out_path, &index).map_err(|err| err.to_string())?;

    let (x, y, z) = index.grid_size();
    println!("map: {} ({})", map_id, metadata.name);
    println!("grid: {}x{}x{} from {}", x, y, z, index.min_index());
    println!(
        "entities: aligned {}, unaligned {}",
        index.aligned().len(),
        index.unaligned().len()
    );
    println!("written: {}", out_path.display());
    println!("fingerprint: {}", fingerprint);
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: index_pack <map.yaml> <out.fidx>");
        std::process::exit(2);
    }
    if let Err(err) = pack(Path::new(&args[1]), Path::new(&args[2])) {
        eprintln!("index_pack: {}", err);
        std::process::exit(1);
    }
}
