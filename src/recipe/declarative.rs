// src/recipe/declarative.rs

//! Hooks of a `recipe.toml` recipe
//!
//! [`DeclarativeRecipe`] interprets a [`RecipeDocument`]: conditional rules
//! become `config_options`/`configure`/`validate`, `[[requires]]` entries
//! become requirements, and the `[build]` backend drives `generate`,
//! `build` and `package`.

use crate::build::{Backend, BackendOptions};
use crate::conf::Conf;
use crate::cpp_info::Component;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::layout::files;
use crate::package_id::PackageIdInfo;
use crate::recipe::condition::Condition;
use crate::recipe::format::{
    scalar_to_string, ConfigureRule, CopyFrom, CppInfoWhen, EnvSection, OptionValuesSpec,
    RecipeDocument, RequireSpec,
};
use crate::recipe::hooks::{
    ConfigureContext, NodeState, PackageInfoContext, RecipeHooks, Requirement,
    RequirementsContext, SourceContext, StageContext, ValidateContext,
};
use crate::recipe::RecipeMetadata;
use crate::settings::OptionDef;
use crate::source;
use crate::version::Version;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%\(([A-Za-z0-9_.]+)\)s").unwrap());

/// Value of a condition path for a node
pub fn node_lookup(node: &NodeState, path: &str) -> Option<String> {
    if let Some(setting) = path.strip_prefix("settings.") {
        return node.settings.get_safe(setting, None).map(str::to_string);
    }
    if let Some(setting) = path.strip_prefix("settings_build.") {
        return node.settings_build.get_safe(setting, None).map(str::to_string);
    }
    if let Some(option) = path.strip_prefix("options.") {
        return node.options.get(option).map(str::to_string);
    }
    match path {
        "name" => Some(node.name.clone()),
        "version" => Some(node.version.to_string()),
        "package_type" => Some(node.package_type.to_string()),
        "context" => Some(node.context.to_string()),
        "cross_building" => Some(if node.is_cross_building() { "True" } else { "False" }.to_string()),
        _ => None,
    }
}

/// Folders available to `%(...)s` substitution
#[derive(Debug, Default, Clone, Copy)]
pub struct Folders<'a> {
    pub source: Option<&'a Path>,
    pub build: Option<&'a Path>,
    pub package: Option<&'a Path>,
    pub jobs: Option<usize>,
}

/// Replace `%(name)s` style variables; unknown variables are left as is
pub fn substitute(template: &str, node: &NodeState, folders: &Folders<'_>) -> String {
    VAR_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            let folder = |p: Option<&Path>| p.map(|p| p.display().to_string());
            let value = match key {
                "package_folder" => folder(folders.package),
                "source_folder" => folder(folders.source),
                "build_folder" => folder(folders.build),
                "jobs" => folders.jobs.map(|j| j.to_string()),
                other => node_lookup(node, other),
            };
            value.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn holds(when: Option<&Condition>, node: &NodeState) -> bool {
    when.is_none_or(|c| c.evaluate(&|path: &str| node_lookup(node, path)))
}

fn parse_when(when: &Option<String>) -> Result<Option<Condition>> {
    when.as_deref().map(Condition::parse).transpose()
}

fn option_def(name: &str, spec: &crate::recipe::format::OptionSpec) -> Result<OptionDef> {
    let default = spec.default.as_ref().map(scalar_to_string);
    let def = match &spec.values {
        OptionValuesSpec::Keyword(k) if k == "ANY" => OptionDef::any(default.as_deref()),
        OptionValuesSpec::Keyword(k) => {
            return Err(Error::ParseError(format!(
                "option '{}': values must be a list or \"ANY\", got '{}'",
                name, k
            )));
        }
        OptionValuesSpec::List(values) => {
            OptionDef::one_of(values.iter().map(scalar_to_string), default.as_deref())
        }
    };
    def.check_default(name)?;
    Ok(def)
}

/// Parsed conditions of a rule list, aligned by index
fn conditions<T>(rules: &[T], when: impl Fn(&T) -> &Option<String>) -> Result<Vec<Option<Condition>>> {
    rules.iter().map(|r| parse_when(when(r))).collect()
}

/// A recipe backed by a `recipe.toml` document
#[derive(Debug)]
pub struct DeclarativeRecipe {
    doc: RecipeDocument,
    config_options_when: Vec<Option<Condition>>,
    configure_when: Vec<Option<Condition>>,
    requires_when: Vec<Option<Condition>>,
    tool_requires_when: Vec<Option<Condition>>,
    validate_when: Vec<Condition>,
    cpp_info_when: Vec<Condition>,
}

impl DeclarativeRecipe {
    /// Check a document and pre-parse its conditions
    pub fn new(doc: RecipeDocument) -> Result<Self> {
        let validate_when = doc
            .validate
            .iter()
            .map(|r| Condition::parse(&r.when))
            .collect::<Result<Vec<_>>>()?;
        let cpp_info_when = doc
            .cpp_info_when
            .iter()
            .map(|r| Condition::parse(&r.when))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config_options_when: conditions(&doc.config_options, |r| &r.when)?,
            configure_when: conditions(&doc.configure, |r| &r.when)?,
            requires_when: conditions(&doc.requires, |r| &r.when)?,
            tool_requires_when: conditions(&doc.tool_requires, |r| &r.when)?,
            validate_when,
            cpp_info_when,
            doc,
        })
    }

    pub fn document(&self) -> &RecipeDocument {
        &self.doc
    }

    /// Declarative metadata of the document
    pub fn metadata(&self) -> Result<RecipeMetadata> {
        let pkg = &self.doc.package;
        let options = self
            .doc
            .options
            .iter()
            .map(|(name, spec)| Ok((name.clone(), option_def(name, spec)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(RecipeMetadata {
            name: pkg.name.clone(),
            version: pkg.version.as_deref().map(Version::parse).transpose()?,
            license: pkg.license.clone(),
            homepage: pkg.homepage.clone(),
            url: pkg.url.clone(),
            description: pkg.description.clone(),
            topics: pkg.topics.clone(),
            package_type: pkg.package_type,
            settings: pkg.settings.clone(),
            options,
            implements: pkg.implements.clone(),
            languages: pkg.languages.clone(),
            retain: self.doc.package_files.retain.clone(),
        })
    }

    fn apply_rules(
        rules: &[ConfigureRule],
        when: &[Option<Condition>],
        node: &mut NodeState,
    ) -> Result<()> {
        for (rule, cond) in rules.iter().zip(when) {
            if !holds(cond.as_ref(), node) {
                continue;
            }
            for option in &rule.remove_options {
                node.options.rm_safe(option);
            }
            for setting in &rule.remove_settings {
                node.settings.rm_safe(setting);
            }
            for (option, value) in &rule.set_options {
                node.options.set(option, &scalar_to_string(value))?;
            }
        }
        Ok(())
    }

    fn requirement(spec: &RequireSpec, tool: bool) -> Result<Requirement> {
        let mut r = if tool {
            Requirement::tool(&spec.reference)?
        } else {
            Requirement::host(&spec.reference)?
        };
        if let Some(v) = spec.headers {
            r.headers(v);
        }
        if let Some(v) = spec.libs {
            r.libs(v);
        }
        if let Some(v) = spec.run {
            r.run(v);
        }
        if let Some(v) = spec.visible {
            r.visible(v);
        }
        if let Some(v) = spec.transitive_headers {
            r.transitive_headers(v);
        }
        if let Some(v) = spec.transitive_libs {
            r.transitive_libs(v);
        }
        if spec.is_override {
            r.force_override();
        }
        if spec.optional {
            r.optional();
        }
        if let Some(mode) = spec.package_id_mode {
            r.package_id_mode(mode);
        }
        for (name, value) in &spec.options {
            r.option(name, &scalar_to_string(value));
        }
        Ok(r)
    }

    fn check_rules(&self, ctx: &ValidateContext<'_>, build_only: bool) -> Result<()> {
        for (rule, cond) in self.doc.validate.iter().zip(&self.validate_when) {
            if rule.build_only == build_only && holds(Some(cond), ctx.node) {
                return Err(ctx.invalid(&rule.message));
            }
        }
        Ok(())
    }

    fn backend_options(&self, ctx: &StageContext<'_>) -> BackendOptions {
        let build = &self.doc.build;
        let folders = Folders {
            source: Some(&ctx.source_folder),
            build: Some(&ctx.build_folder),
            package: Some(&ctx.package_folder),
            jobs: Some(ctx.jobs),
        };
        let sub = |s: &str| substitute(s, ctx.node, &folders);
        BackendOptions {
            subdir: build.subdir.clone(),
            generator: build.generator.clone(),
            cache_variables: build
                .cache_variables
                .iter()
                .map(|(k, v)| (k.clone(), sub(&scalar_to_string(v))))
                .collect(),
            configure_args: build.configure_args.iter().map(|a| sub(a)).collect(),
            targets: build.targets.clone(),
            env: build.env.iter().map(|(k, v)| (k.clone(), sub(v))).collect(),
            timeout: build.timeout_secs.map(Duration::from_secs),
        }
    }

    fn backend(&self) -> Backend {
        self.doc.build.backend.unwrap_or(Backend::NoBuild)
    }
}

fn env_from_section(section: &EnvSection, node: &NodeState, folders: &Folders<'_>) -> Environment {
    let mut env = Environment::new();
    let sub = |s: &str| substitute(s, node, folders);
    for (k, v) in &section.define {
        env.define(k, &sub(v));
    }
    for (k, v) in &section.define_path {
        env.define_path(k, &sub(v));
    }
    for (k, v) in &section.append {
        env.append(k, &sub(v));
    }
    for (k, v) in &section.append_path {
        env.append_path(k, &sub(v));
    }
    for (k, v) in &section.prepend {
        env.prepend(k, &sub(v));
    }
    for (k, v) in &section.prepend_path {
        env.prepend_path(k, &sub(v));
    }
    for k in &section.unset {
        env.unset(k);
    }
    env
}

fn add_to_component(component: &mut Component, extra: &CppInfoWhen) {
    component.libs.extend(extra.libs.iter().cloned());
    component.system_libs.extend(extra.system_libs.iter().cloned());
    component.frameworks.extend(extra.frameworks.iter().cloned());
    component.defines.extend(extra.defines.iter().cloned());
    component.cflags.extend(extra.cflags.iter().cloned());
    component.cxxflags.extend(extra.cxxflags.iter().cloned());
    component.sharedlinkflags.extend(extra.sharedlinkflags.iter().cloned());
    component.exelinkflags.extend(extra.exelinkflags.iter().cloned());
}

/// Project a version-like setting value to `major` or `minor`
fn narrow_value(value: &str, projection: &str) -> String {
    match (projection, Version::parse(value)) {
        ("major", Ok(v)) => v.upto(1),
        ("minor", Ok(v)) => v.upto(2),
        ("major" | "minor", Err(_)) => value.to_string(),
        (literal, _) => literal.to_string(),
    }
}

impl RecipeHooks for DeclarativeRecipe {
    fn build_backend(&self) -> Option<Backend> {
        Some(self.backend())
    }

    fn config_options(&self, ctx: &mut ConfigureContext<'_>) -> Result<()> {
        Self::apply_rules(&self.doc.config_options, &self.config_options_when, ctx.node)
    }

    fn configure(&self, ctx: &mut ConfigureContext<'_>) -> Result<()> {
        Self::apply_rules(&self.doc.configure, &self.configure_when, ctx.node)
    }

    fn requirements(&self, ctx: &mut RequirementsContext<'_>) -> Result<()> {
        for (spec, cond) in self.doc.requires.iter().zip(&self.requires_when) {
            if holds(cond.as_ref(), ctx.node) {
                ctx.add(Self::requirement(spec, false)?);
            }
        }
        Ok(())
    }

    fn build_requirements(&self, ctx: &mut RequirementsContext<'_>) -> Result<()> {
        for (spec, cond) in self.doc.tool_requires.iter().zip(&self.tool_requires_when) {
            if holds(cond.as_ref(), ctx.node) {
                ctx.add(Self::requirement(spec, true)?);
            }
        }
        Ok(())
    }

    fn validate(&self, ctx: &ValidateContext<'_>) -> Result<()> {
        self.check_rules(ctx, false)
    }

    fn validate_build(&self, ctx: &ValidateContext<'_>) -> Result<()> {
        self.check_rules(ctx, true)
    }

    fn source(&self, ctx: &mut SourceContext<'_>) -> Result<()> {
        ctx.get_data_sources()?;
        ctx.apply_data_patches()?;
        for replace in &self.doc.source.replace {
            let path = ctx.source_folder.join(&replace.file);
            source::replace_in_file(&path, &replace.search, &replace.replace, replace.strict)?;
        }
        Ok(())
    }

    fn generate(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let opts = self.backend_options(ctx);
        let written = self.backend().generate(&ctx.generator_input(), &opts)?;
        debug!("Generated {} file(s) for {}", written.len(), ctx.node.name);
        Ok(())
    }

    fn build(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let opts = self.backend_options(ctx);
        self.backend().configure_and_build(ctx, &opts)?;
        let folders = Folders {
            source: Some(&ctx.source_folder),
            build: Some(&ctx.build_folder),
            package: Some(&ctx.package_folder),
            jobs: Some(ctx.jobs),
        };
        for command in &self.doc.build.commands {
            let command = substitute(command, ctx.node, &folders);
            ctx.runner.run(&command, &ctx.build_folder, &opts.run_options())?;
        }
        Ok(())
    }

    fn package(&self, ctx: &mut StageContext<'_>) -> Result<()> {
        let opts = self.backend_options(ctx);
        self.backend().install(ctx, &opts)?;

        let files_section = &self.doc.package_files;
        let licenses = ctx.package_folder.join("licenses");
        for pattern in &files_section.licenses {
            files::copy(pattern, &ctx.source_folder, &licenses, false, &[])?;
        }
        for rule in &files_section.copy {
            let base = match rule.from {
                CopyFrom::Source => &ctx.source_folder,
                CopyFrom::Build => &ctx.build_folder,
            };
            let src = match &rule.src {
                Some(sub) => base.join(sub),
                None => base.clone(),
            };
            let dst = ctx.package_folder.join(&rule.dst);
            files::copy(&rule.pattern, &src, &dst, rule.keep_path, &rule.excludes)?;
        }
        Ok(())
    }

    fn package_info(&self, ctx: &mut PackageInfoContext<'_>) -> Result<()> {
        *ctx.cpp_info = self.doc.cpp_info.clone();
        for (extra, cond) in self.doc.cpp_info_when.iter().zip(&self.cpp_info_when) {
            if !holds(Some(cond), ctx.node) {
                continue;
            }
            let component = match &extra.component {
                Some(name) => ctx.cpp_info.components.entry(name.clone()).or_default(),
                None => &mut ctx.cpp_info.root,
            };
            add_to_component(component, extra);
        }

        let folders = Folders {
            package: Some(ctx.package_folder),
            ..Default::default()
        };
        *ctx.buildenv_info = env_from_section(&self.doc.buildenv_info, ctx.node, &folders);
        *ctx.runenv_info = env_from_section(&self.doc.runenv_info, ctx.node, &folders);
        let mut conf = Conf::new();
        for (key, value) in &self.doc.conf_info {
            conf.define(key, value.clone())?;
        }
        *ctx.conf_info = conf;
        Ok(())
    }

    fn package_id(&self, info: &mut PackageIdInfo) -> Result<()> {
        let section = &self.doc.package_id;
        if section.clear {
            info.clear();
            return Ok(());
        }
        for setting in &section.remove_settings {
            info.settings.rm_safe(setting);
        }
        for option in &section.remove_options {
            info.options.rm_safe(option);
        }
        for (path, projection) in &section.narrow {
            if let Some(value) = info.settings.get_safe(path, None) {
                let narrowed = narrow_value(value, projection);
                info.settings.narrow(path, &narrowed);
            }
        }
        for (dep, mode) in &section.modes {
            info.set_mode(dep, *mode);
        }
        Ok(())
    }
}
