use anyhow::{anyhow, Context};
use simbind_gen::codegen::{CHeaderGenerator, CHeaderOptions};
use simbind_gen::{compile_class_spec, ClassMetadata, MemberCategory, MemberFilter};
use simbind_runtime::{NativeLibrary, SimClass};
use simbind_types::{CType, ClassSpec};
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

fn load_spec(file: &Path) -> anyhow::Result<ClassSpec> {
    ClassSpec::from_yaml_file(file).with_context(|| format!("loading {}", file.display()))
}

fn compile(file: &Path) -> anyhow::Result<ClassMetadata> {
    let spec = load_spec(file)?;
    let meta = compile_class_spec(&spec)?;
    info!(class = %meta.name, "compiled {}", file.display());
    Ok(meta)
}

pub fn check(file: &Path) -> anyhow::Result<String> {
    let meta = compile(file)?;
    let mut out = String::new();
    writeln!(
        out,
        "Class {} (struct size {}, align {})",
        meta.name, meta.layout.size, meta.layout.alignment
    )?;

    if !meta.indices.is_empty() {
        writeln!(out, "Indices:")?;
        for index in meta.indices.values() {
            match index.default {
                Some(default) => writeln!(out, "  {} -> {} (default {})", index.name, index.count_member, default)?,
                None => writeln!(out, "  {} -> {}", index.name, index.count_member)?,
            }
        }
    }

    writeln!(out, "Members: {}", meta.members.len())?;
    for summary in meta.member_summaries() {
        writeln!(out, "  {:<16} {}", summary.name, summary.declaration)?;
    }

    writeln!(out, "Functions: {}", meta.functions.len())?;
    for function in meta.functions.values() {
        writeln!(out, "  {} ({} symbol(s))", function.name(), function.symbols.len())?;
    }

    if !meta.subsets.is_empty() {
        writeln!(out, "Subsets:")?;
        for subset in meta.subsets.subsets() {
            writeln!(
                out,
                "  {} (default {}): {} member(s), {} function(s)",
                subset.name,
                if subset.default { "on" } else { "off" },
                subset.members.len(),
                subset.functions.len()
            )?;
        }
    }
    Ok(out)
}

pub fn layout(file: &Path, pretty: bool) -> anyhow::Result<String> {
    let meta = compile(file)?;
    let json = if pretty {
        serde_json::to_string_pretty(&meta.layout)?
    } else {
        serde_json::to_string(&meta.layout)?
    };
    Ok(json)
}

pub fn symbols(file: &Path) -> anyhow::Result<String> {
    let meta = compile(file)?;
    let mut out = String::new();
    for (concrete, symbol) in meta.symbols() {
        writeln!(out, "{concrete} -> {symbol}")?;
    }
    Ok(out)
}

pub fn header(file: &Path, emit_offsets: bool) -> anyhow::Result<String> {
    let meta = compile(file)?;
    let options = CHeaderOptions {
        emit_offsets,
        emit_include_guard: true,
    };
    Ok(CHeaderGenerator::new(&meta, options).emit())
}

pub fn members(
    file: &Path,
    category: Option<MemberCategory>,
    ndim: Option<usize>,
    ctype: Option<&str>,
    json: bool,
) -> anyhow::Result<String> {
    let meta = compile(file)?;
    let mut filter = MemberFilter::default();
    if let Some(category) = category {
        filter = filter.category(category);
    }
    if let Some(ndim) = ndim {
        filter = filter.ndim(ndim);
    }
    if let Some(token) = ctype {
        let ctype = CType::from_token(token).ok_or_else(|| anyhow!("unknown C type '{token}'"))?;
        filter = filter.ctype(ctype);
    }

    let selected: Vec<_> = meta
        .member_summaries()
        .into_iter()
        .zip(&meta.members)
        .filter(|(_, member)| filter.matches(member))
        .map(|(summary, _)| summary)
        .collect();

    if json {
        return Ok(serde_json::to_string_pretty(&selected)?);
    }
    let mut out = String::new();
    for summary in &selected {
        writeln!(out, "{}", summary.name)?;
    }
    Ok(out)
}

pub fn bind(file: &Path, library: Option<&Path>) -> anyhow::Result<String> {
    let spec = load_spec(file)?;
    let mut builder = SimClass::builder(spec);
    if let Some(path) = library {
        let library = NativeLibrary::load(path)?;
        builder = builder.symbols(Arc::new(library));
    }
    let class = builder.build()?;

    let meta = class.metadata();
    let mut out = String::new();
    writeln!(out, "Bound {} using {}", meta.name, class.symbol_source().describe())?;
    for (_, symbol) in meta.symbols() {
        writeln!(out, "  {symbol}")?;
    }
    writeln!(out, "{} symbol(s) resolved", meta.symbols().len())?;
    Ok(out)
}
