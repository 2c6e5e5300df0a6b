use std::io::Result;
use std::path::PathBuf;

//Regenerates sprig-types/src/generated/sparkplug_payload.rs from the
//Sparkplug B proto definition. Run manually after editing the proto, the
//output is checked in so downstream builds do not need protoc.
fn main() -> Result<()> {
    let dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap());
    let workspace = dir.parent().unwrap();
    let protodir = workspace.join("protos");
    let sparkplug_proto = "sparkplug_b.proto";

    let outdir = workspace.join("sprig-types/src/generated");

    prost_build::Config::new()
        .out_dir(outdir.clone())
        .compile_protos(&[sparkplug_proto], &[protodir])?;

    let outfile = outdir.join("org.eclipse.tahu.protobuf.rs");
    let renamed = outdir.join("sparkplug_payload.rs");
    std::fs::rename(outfile, renamed)?;

    Ok(())
}
