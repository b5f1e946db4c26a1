//! Build script for compiling the DCF protobuf contract into Rust code

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so builds do not depend on a system install
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/dcf.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/dcf.proto");
    Ok(())
}
