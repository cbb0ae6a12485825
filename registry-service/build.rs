fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("registry_descriptor.bin"))
        .compile_protos(
            &[
                "../proto/buff/v1/auth.proto",
                "../proto/buff/v1/registry.proto",
            ],
            &["../proto"],
        )?;

    println!("cargo:rerun-if-changed=../proto/buff/v1/auth.proto");
    println!("cargo:rerun-if-changed=../proto/buff/v1/registry.proto");

    Ok(())
}
