//! Loading filters from external shared libraries.
//!
//! A plugin is a `cdylib` built against this crate with the same compiler. It
//! exports a single [`PluginDeclaration`] static named `gateway_filter_plugin`,
//! normally via [`declare_filter_plugin!`](crate::declare_filter_plugin). The
//! loader opens the library, checks the declaration's magic, ABI version,
//! entry-point signature and gateway version, then calls the entry point once.
//!
//! # Trust
//!
//! Loaded code runs inside the gateway process with its full privileges. There
//! is no sandboxing: the operator vouches for every module path placed in the
//! configuration. The declaration checks only catch modules built for a
//! different gateway or ABI, not hostile ones.

use super::error::{BoxError, ResolveError};
use super::{Filter, FilterAction, FilterContext, FilterError};
use async_trait::async_trait;
use http::StatusCode;
use libloading::{Library, Symbol};
use std::ffi::{c_char, CStr};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Exported symbol every plugin must provide.
pub const ENTRY_POINT_SYMBOL: &str = "gateway_filter_plugin";

pub const PLUGIN_MAGIC: u64 = u64::from_le_bytes(*b"GWFILTER");

pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Textual form of [`EntryPoint`], compared byte-for-byte at load time.
pub const ENTRY_POINT_SIGNATURE: &CStr =
    c"fn() -> Result<Box<dyn gateway::filter::Filter>, gateway::filter::BoxError>";

pub const GATEWAY_VERSION: &CStr = match CStr::from_bytes_with_nul(
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes(),
) {
    Ok(v) => v,
    Err(_) => panic!("package version contains a NUL byte"),
};

/// Zero-argument constructor exported by a plugin.
pub type EntryPoint = fn() -> Result<Box<dyn Filter>, BoxError>;

/// Layout of the `gateway_filter_plugin` static.
///
/// The leading fields are plain C data so a foreign symbol of the same name can
/// be recognised and rejected before `entry` is ever touched.
#[repr(C)]
pub struct PluginDeclaration {
    pub magic: u64,
    pub abi_version: u32,
    pub signature: *const c_char,
    pub gateway_version: *const c_char,
    pub entry: EntryPoint,
}

// Only ever points at string literals with 'static lifetime.
unsafe impl Sync for PluginDeclaration {}

/// Exports a [`PluginDeclaration`] for `$constructor`, which must have the
/// [`EntryPoint`] signature.
///
/// ```ignore
/// fn new_external_filter() -> Result<Box<dyn Filter>, BoxError> {
///     Ok(Box::new(MyFilter::default()))
/// }
/// gateway::declare_filter_plugin!(new_external_filter);
/// ```
#[macro_export]
macro_rules! declare_filter_plugin {
    ($constructor:path) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static gateway_filter_plugin: $crate::filter::external::PluginDeclaration =
            $crate::filter::external::PluginDeclaration {
                magic: $crate::filter::external::PLUGIN_MAGIC,
                abi_version: $crate::filter::external::PLUGIN_ABI_VERSION,
                signature: $crate::filter::external::ENTRY_POINT_SIGNATURE.as_ptr(),
                gateway_version: $crate::filter::external::GATEWAY_VERSION.as_ptr(),
                entry: $constructor,
            };
    };
}

/// Resolves an external module path to a filter instance.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Arc<dyn Filter>, ResolveError>;
}

/// [`ModuleLoader`] backed by the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn Filter>, ResolveError> {
        if path.as_os_str().is_empty() {
            return Err(ResolveError::ModuleLoad {
                path: path.to_path_buf(),
                source: "module path is empty".into(),
            });
        }

        info!("📦 Loading external filter module: {}", path.display());

        // SAFETY: running the module's initialisers is the trust boundary
        // described at the top of this file.
        let library = unsafe { Library::new(path) }.map_err(|e| ResolveError::ModuleLoad {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;

        let declaration: *const PluginDeclaration = unsafe {
            let symbol: Symbol<*const PluginDeclaration> = library
                .get(ENTRY_POINT_SYMBOL.as_bytes())
                .map_err(|e| {
                    debug!("symbol lookup failed in {}: {}", path.display(), e);
                    ResolveError::EntryPointMissing {
                        path: path.to_path_buf(),
                        symbol: ENTRY_POINT_SYMBOL,
                    }
                })?;
            *symbol
        };

        if declaration.is_null() {
            return Err(mismatch(path, "null symbol address".to_string()));
        }

        // SAFETY: non-null address of an exported static; only the leading
        // C fields are read before the magic and ABI checks pass.
        let entry = unsafe { validate_declaration(path, &*declaration)? };

        let inner = entry().map_err(|source| ResolveError::Constructor {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            "✅ External filter `{}` loaded from {}",
            inner.name(),
            path.display()
        );

        Ok(Arc::new(ExternalFilter {
            inner,
            _library: Arc::new(library),
        }))
    }
}

/// Checks a declaration and returns its entry point.
///
/// # Safety
///
/// `signature` and `gateway_version` must be null or point at NUL-terminated
/// strings whenever `magic` and `abi_version` match.
pub unsafe fn validate_declaration(
    path: &Path,
    declaration: &PluginDeclaration,
) -> Result<EntryPoint, ResolveError> {
    if declaration.magic != PLUGIN_MAGIC {
        return Err(mismatch(
            path,
            format!(
                "symbol without the plugin declaration magic (0x{:016x})",
                declaration.magic
            ),
        ));
    }
    if declaration.abi_version != PLUGIN_ABI_VERSION {
        return Err(mismatch(
            path,
            format!("plugin declaration ABI v{}", declaration.abi_version),
        ));
    }

    let signature = unsafe { read_c_str(declaration.signature) };
    if signature.as_deref() != ENTRY_POINT_SIGNATURE.to_str().ok() {
        return Err(mismatch(
            path,
            signature.unwrap_or_else(|| "<missing signature>".to_string()),
        ));
    }

    let version = unsafe { read_c_str(declaration.gateway_version) };
    let host_version = GATEWAY_VERSION.to_str().unwrap_or_default();
    if version.as_deref() != Some(host_version) {
        return Err(ResolveError::ModuleLoad {
            path: path.to_path_buf(),
            source: format!(
                "version mismatch: module built against gateway {}, host is {}",
                version.as_deref().unwrap_or("<unknown>"),
                host_version
            )
            .into(),
        });
    }

    Ok(declaration.entry)
}

unsafe fn read_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .ok()
        .map(str::to_string)
}

fn mismatch(path: &Path, found: String) -> ResolveError {
    ResolveError::EntryPointMismatch {
        path: path.to_path_buf(),
        symbol: ENTRY_POINT_SYMBOL,
        expected: ENTRY_POINT_SIGNATURE.to_string_lossy().into_owned(),
        found,
    }
}

/// A plugin-provided filter plus the library that holds its code.
///
/// `inner` is declared first so it is dropped before the library is unmapped.
pub struct ExternalFilter {
    inner: Box<dyn Filter>,
    _library: Arc<Library>,
}

#[async_trait]
impl Filter for ExternalFilter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
        self.inner.process(ctx).await
    }

    fn on_response(&self, ctx: &FilterContext, status: StatusCode) {
        self.inner.on_response(ctx, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    #[async_trait]
    impl Filter for Passthrough {
        fn name(&self) -> &str {
            "PASSTHROUGH"
        }

        async fn process(&self, _ctx: &mut FilterContext) -> Result<FilterAction, FilterError> {
            Ok(FilterAction::Continue)
        }
    }

    fn new_passthrough() -> Result<Box<dyn Filter>, BoxError> {
        Ok(Box::new(Passthrough))
    }

    fn declaration() -> PluginDeclaration {
        PluginDeclaration {
            magic: PLUGIN_MAGIC,
            abi_version: PLUGIN_ABI_VERSION,
            signature: ENTRY_POINT_SIGNATURE.as_ptr(),
            gateway_version: GATEWAY_VERSION.as_ptr(),
            entry: new_passthrough,
        }
    }

    fn validate(decl: &PluginDeclaration) -> Result<EntryPoint, ResolveError> {
        unsafe { validate_declaration(Path::new("/plugins/libtest.so"), decl) }
    }

    #[test]
    fn accepts_matching_declaration() {
        let entry = validate(&declaration()).expect("valid declaration");
        let filter = entry().unwrap();
        assert_eq!(filter.name(), "PASSTHROUGH");
    }

    #[test]
    fn wrong_magic_is_a_type_mismatch() {
        let decl = PluginDeclaration {
            magic: 0xdead_beef,
            ..declaration()
        };
        match validate(&decl) {
            Err(ResolveError::EntryPointMismatch { path, found, .. }) => {
                assert_eq!(path, Path::new("/plugins/libtest.so"));
                assert!(found.contains("magic"));
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn wrong_signature_reports_expected_and_found() {
        let decl = PluginDeclaration {
            signature: c"fn(u32) -> Box<dyn Filter>".as_ptr(),
            ..declaration()
        };
        match validate(&decl) {
            Err(ResolveError::EntryPointMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, ENTRY_POINT_SIGNATURE.to_str().unwrap());
                assert_eq!(found, "fn(u32) -> Box<dyn Filter>");
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn abi_version_is_checked_before_signature() {
        let decl = PluginDeclaration {
            abi_version: PLUGIN_ABI_VERSION + 1,
            signature: std::ptr::null(),
            ..declaration()
        };
        assert!(matches!(
            validate(&decl),
            Err(ResolveError::EntryPointMismatch { .. })
        ));
    }

    #[test]
    fn gateway_version_mismatch_is_a_load_error() {
        let decl = PluginDeclaration {
            gateway_version: c"0.0.0-other".as_ptr(),
            ..declaration()
        };
        let err = validate(&decl).err().expect("should fail");
        assert!(matches!(err, ResolveError::ModuleLoad { .. }));
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = DylibLoader
            .load(Path::new("/bad/path.so"))
            .err()
            .expect("should fail");
        assert!(matches!(err, ResolveError::ModuleLoad { .. }));
        assert!(err.to_string().contains("/bad/path.so"));
    }

    #[test]
    fn empty_path_is_a_load_error() {
        let err = DylibLoader.load(Path::new("")).err().expect("should fail");
        assert!(matches!(err, ResolveError::ModuleLoad { .. }));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn library_without_entry_point() {
        let err = DylibLoader
            .load(Path::new("libc.so.6"))
            .err()
            .expect("libc exports no plugin declaration");
        match err {
            ResolveError::EntryPointMissing { symbol, .. } => {
                assert_eq!(symbol, ENTRY_POINT_SYMBOL)
            }
            other => panic!("unexpected: {other}"),
        }
    }
}
