fn main() -> Result<(), Box<dyn std::error::Error>> {
    // - api.proto: Registration (plugin calls kubelet) and DevicePlugin (kubelet calls plugin)
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/api.proto"], &["proto/"])?;

    println!("cargo:rerun-if-changed=proto/api.proto");

    Ok(())
}
