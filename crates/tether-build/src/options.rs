//! Build options and their merge with per-function hints
//!
//! Defaults depend on the module format. Hints combine with them by kind:
//! - scalar values: the hint replaces the default
//! - list values: default then hint, concatenated
//! - map values: shallow merge, the hint wins on a key collision
//! - banner and footer: per key, default and hint joined with a newline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tether_core::{BundlingHints, ModuleFormat};

/// Banner giving ESM bundles the `require` and `__dirname` globals
pub const ESM_BANNER: &str = "import { createRequire as topLevelCreateRequire } from 'module';\n\
global.require = global.require ?? topLevelCreateRequire(import.meta.url);\n\
import { fileURLToPath as topLevelFileUrlToPath, URL as topLevelURL } from \"url\"\n\
global.__dirname = global.__dirname ?? topLevelFileUrlToPath(new topLevelURL(\".\", import.meta.url))";

/// Source map flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMap {
    /// Separate `.map` file referenced from the output
    Linked,
    /// Inlined into the output
    Inline,
    /// No source map
    None,
}

/// Fully resolved options for one function's build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    pub entry_points: Vec<PathBuf>,
    pub outdir: PathBuf,
    pub format: ModuleFormat,
    pub platform: String,
    pub target: String,
    pub bundle: bool,
    pub keep_names: bool,
    pub metafile: bool,
    pub minify: bool,
    pub sourcemap: SourceMap,
    pub external: Vec<String>,
    pub main_fields: Vec<String>,
    pub conditions: Vec<String>,
    pub resolve_extensions: Vec<String>,
    pub node_paths: Vec<String>,
    pub plugins: Vec<String>,
    pub alias: BTreeMap<String, String>,
    pub loader: BTreeMap<String, String>,
    pub define: BTreeMap<String, String>,
    pub out_extension: BTreeMap<String, String>,
    pub banner: BTreeMap<String, String>,
    pub footer: BTreeMap<String, String>,
}

impl BuildOptions {
    /// Defaults for a format
    #[must_use]
    pub fn defaults(entry_point: impl Into<PathBuf>, outdir: impl Into<PathBuf>, format: ModuleFormat) -> Self {
        let (target, main_fields, banner) = match format {
            ModuleFormat::Esm => (
                "esnext",
                vec!["module".to_string(), "main".to_string()],
                BTreeMap::from([("js".to_string(), ESM_BANNER.to_string())]),
            ),
            ModuleFormat::CommonJs => ("node14", Vec::new(), BTreeMap::new()),
        };

        Self {
            entry_points: vec![entry_point.into()],
            outdir: outdir.into(),
            format,
            platform: "node".to_string(),
            target: target.to_string(),
            bundle: true,
            keep_names: true,
            metafile: true,
            minify: false,
            sourcemap: SourceMap::Linked,
            external: Vec::new(),
            main_fields,
            conditions: Vec::new(),
            resolve_extensions: Vec::new(),
            node_paths: Vec::new(),
            plugins: Vec::new(),
            alias: BTreeMap::new(),
            loader: BTreeMap::new(),
            define: BTreeMap::new(),
            out_extension: BTreeMap::new(),
            banner,
            footer: BTreeMap::new(),
        }
    }

    /// Combine with per-function hints
    #[must_use]
    pub fn merged_with(mut self, hints: &BundlingHints) -> Self {
        if let Some(target) = &hints.target {
            self.target.clone_from(target);
        }
        if let Some(platform) = &hints.platform {
            self.platform.clone_from(platform);
        }
        if let Some(minify) = hints.minify {
            self.minify = minify;
        }

        combine_list(&mut self.external, hints.external.as_ref());
        combine_list(&mut self.main_fields, hints.main_fields.as_ref());
        combine_list(&mut self.conditions, hints.conditions.as_ref());
        combine_list(&mut self.resolve_extensions, hints.resolve_extensions.as_ref());
        combine_list(&mut self.node_paths, hints.node_paths.as_ref());
        combine_list(&mut self.plugins, hints.plugins.as_ref());

        combine_map(&mut self.alias, hints.alias.as_ref());
        combine_map(&mut self.loader, hints.loader.as_ref());
        combine_map(&mut self.define, hints.define.as_ref());
        combine_map(&mut self.out_extension, hints.out_extension.as_ref());

        combine_text(&mut self.banner, hints.banner.as_ref());
        combine_text(&mut self.footer, hints.footer.as_ref());
        self
    }

    /// Output directory
    #[inline]
    #[must_use]
    pub fn outdir(&self) -> &Path {
        &self.outdir
    }
}

fn combine_list(base: &mut Vec<String>, extra: Option<&Vec<String>>) {
    if let Some(extra) = extra {
        base.extend(extra.iter().cloned());
    }
}

fn combine_map(base: &mut BTreeMap<String, String>, extra: Option<&BTreeMap<String, String>>) {
    if let Some(extra) = extra {
        base.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

fn combine_text(base: &mut BTreeMap<String, String>, extra: Option<&BTreeMap<String, String>>) {
    for (key, value) in extra.into_iter().flatten() {
        match base.get_mut(key) {
            Some(existing) if !existing.is_empty() => {
                existing.push('\n');
                existing.push_str(value);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Pick the module format
///
/// An explicit hint wins over the manifest's declared type; a disagreement
/// between the two is logged. Without either, CommonJS.
#[must_use]
pub fn resolve_format(
    hint: Option<ModuleFormat>,
    manifest: Option<ModuleFormat>,
    code_path: &Path,
) -> ModuleFormat {
    match (hint, manifest) {
        (Some(hint), Some(declared)) if hint != declared => {
            tracing::warn!(
                "Module type mismatch for {}: package manifest says {declared}, bundling options say {hint}. Using {hint}.",
                code_path.display()
            );
            hint
        }
        (Some(format), _) | (None, Some(format)) => format,
        (None, None) => ModuleFormat::CommonJs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hints() -> BundlingHints {
        BundlingHints {
            target: Some("node20".into()),
            external: Some(vec!["aws-sdk".into()]),
            main_fields: Some(vec!["browser".into()]),
            alias: Some(BTreeMap::from([("@lib".into(), "./lib".into())])),
            banner: Some(BTreeMap::from([
                ("js".into(), "// hint".into()),
                ("css".into(), "/* css */".into()),
            ])),
            ..BundlingHints::default()
        }
    }

    #[test]
    fn esm_defaults() {
        let options = BuildOptions::defaults("src/a.ts", "out", ModuleFormat::Esm);
        assert_eq!(options.target, "esnext");
        assert_eq!(options.main_fields, vec!["module", "main"]);
        assert!(options.banner["js"].contains("topLevelCreateRequire"));
        assert_eq!(options.sourcemap, SourceMap::Linked);
        assert!(options.bundle && options.keep_names && options.metafile);
    }

    #[test]
    fn cjs_defaults() {
        let options = BuildOptions::defaults("src/a.ts", "out", ModuleFormat::CommonJs);
        assert_eq!(options.target, "node14");
        assert!(options.main_fields.is_empty());
        assert!(options.banner.is_empty());
    }

    #[test]
    fn merge_combines_by_kind() {
        let options =
            BuildOptions::defaults("src/a.ts", "out", ModuleFormat::Esm).merged_with(&hints());

        assert_eq!(options.target, "node20");
        assert_eq!(options.external, vec!["aws-sdk"]);
        assert_eq!(options.main_fields, vec!["module", "main", "browser"]);
        assert_eq!(options.alias["@lib"], "./lib");
        assert!(options.banner["js"].starts_with("import { createRequire"));
        assert!(options.banner["js"].ends_with("\n// hint"));
        assert_eq!(options.banner["css"], "/* css */");
    }

    #[test]
    fn map_hint_wins_on_collision() {
        let mut base = BTreeMap::from([("a".to_string(), "1".to_string())]);
        combine_map(&mut base, Some(&BTreeMap::from([("a".into(), "2".into())])));
        assert_eq!(base["a"], "2");
    }

    #[test]
    fn empty_hints_keep_defaults() {
        let defaults = BuildOptions::defaults("src/a.ts", "out", ModuleFormat::CommonJs);
        let merged = defaults.clone().merged_with(&BundlingHints::default());
        assert_eq!(merged, defaults);
    }

    #[test]
    fn format_precedence() {
        let path = Path::new("src/a.ts");
        assert_eq!(resolve_format(None, None, path), ModuleFormat::CommonJs);
        assert_eq!(resolve_format(None, Some(ModuleFormat::Esm), path), ModuleFormat::Esm);
        assert_eq!(
            resolve_format(Some(ModuleFormat::CommonJs), Some(ModuleFormat::Esm), path),
            ModuleFormat::CommonJs
        );
        assert_eq!(resolve_format(Some(ModuleFormat::Esm), None, path), ModuleFormat::Esm);
    }
}
