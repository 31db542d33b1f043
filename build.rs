fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Prefer a system protoc when the caller points at one.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::compile_protos("proto/deviceplugin/v1beta1/api.proto")?;

    // Runtime-facing messages are logged as JSON before they are sent back.
    tonic_build::configure()
        .type_attribute(".", "#[derive(serde::Serialize)]")
        .compile_protos(&["proto/lifecycle/v1/lifecycle.proto"], &["proto"])?;

    Ok(())
}
