use std::io::Result;
use std::path::Path;

fn main() -> Result<()> {
    // Ensure a usable `protoc` is available (vendored fallback)
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(pb) = protoc_bin_vendored::protoc_bin_path() {
            // SAFETY: build scripts are single-threaded; nothing else reads the environment concurrently.
            unsafe { std::env::set_var("PROTOC", pb) };
        }
    }
    // Docker images mount protos at the root, local checkouts keep them two levels up
    let proto_path = if Path::new("/protos").exists() {
        "/protos"
    } else {
        "../../protos"
    };

    let storage_proto = format!("{proto_path}/storage/storage.proto");
    println!("cargo:rerun-if-changed={storage_proto}");

    let out_dir = std::env::var("OUT_DIR").map_err(std::io::Error::other)?;

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(format!("{out_dir}/storage_descriptor.bin"))
        .compile_protos(&[storage_proto.as_str()], &[proto_path])?;
    Ok(())
}
