use ort::execution_providers::ExecutionProviderDispatch;

/// Accelerators registered ahead of ONNX Runtime's built-in CPU provider.
///
/// A provider that fails to register is skipped by ort, so inference always
/// has the CPU to fall back on. Linux server builds run on CPU only.
pub fn accelerators() -> Vec<ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        Vec::new()
    }
}

/// Name of the preferred provider, for startup logging.
pub fn accelerator_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "CoreML"
    } else if cfg!(target_os = "windows") {
        "DirectML"
    } else {
        "CPU"
    }
}
