use std::env;

fn main() {
    println!("cargo::rustc-check-cfg=cfg(trtrun_mock)");
    println!("cargo:rerun-if-env-changed=DEP_NVINFER_MOCK");

    // trtrun-sys reports which backend it was built against
    if env::var("DEP_NVINFER_MOCK").as_deref() == Ok("1") {
        println!("cargo:rustc-cfg=trtrun_mock");
    }
}
