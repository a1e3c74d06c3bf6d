//! `translator`: reads a pipeline document from a file, compiles it, and
//! prints the resulting SQL (and bind variables) to stdout or a file.

use std::fs;
use std::path::PathBuf;
use std::process::exit;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value as Json;

use aggsql::sql::dialect::{Dialect, GenericJson, OracleJson};
use aggsql::{translate, CompileOutput, Config};

#[derive(Parser, Debug)]
#[command(name = "translator", version, about = "Compile an aggregation pipeline document to SQL")]
struct Cli {
    /// JSON file: a bare pipeline array, a `{name, collection, pipeline}`
    /// document, or a `{pipelines: [...]}` container.
    input: PathBuf,

    /// Source collection name, required when `input` is a bare pipeline array.
    #[arg(short, long)]
    collection: Option<String>,

    /// Schema to qualify the source collection (and any `$lookup`/
    /// `$unionWith`/`$graphLookup`/`$merge` targets) with.
    #[arg(long)]
    schema: Option<String>,

    /// Inline literal values into the SQL text instead of emitting `:N` bind
    /// placeholders.
    #[arg(short, long)]
    inline: bool,

    /// Write output to a file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use the conservative `generic_json` dialect instead of `oracle_json`.
    #[arg(long)]
    generic_dialect: bool,

    /// Break the SQL onto multiple lines at top-level clause boundaries.
    #[arg(short, long)]
    pretty: bool,
}

/// Inserts a newline before each top-level clause keyword. Cosmetic only —
/// the compiler itself emits single-line SQL.
fn pretty_print(sql: &str) -> String {
    const CLAUSES: &[&str] = &["FROM ", "WHERE ", "GROUP BY ", "HAVING ", "ORDER BY ", "OFFSET ", "FETCH FIRST "];
    let mut out = sql.to_string();
    for clause in CLAUSES {
        out = out.replace(&format!(" {clause}"), &format!("\n{clause}"));
    }
    out
}

#[derive(serde::Deserialize)]
struct NamedPipeline {
    name: Option<String>,
    collection: String,
    pipeline: Json,
}

enum Input {
    Bare(Json),
    Named(NamedPipeline),
    Multi(Vec<NamedPipeline>),
}

fn parse_input(raw: &Json) -> anyhow::Result<Input> {
    if raw.is_array() {
        return Ok(Input::Bare(raw.clone()));
    }
    if let Some(obj) = raw.as_object() {
        if let Some(pipelines) = obj.get("pipelines") {
            let named: Vec<NamedPipeline> =
                serde_json::from_value(pipelines.clone()).context("parsing `pipelines` container")?;
            return Ok(Input::Multi(named));
        }
        if obj.contains_key("pipeline") {
            let named: NamedPipeline = serde_json::from_value(raw.clone()).context("parsing named pipeline document")?;
            return Ok(Input::Named(named));
        }
    }
    bail!("input must be a pipeline array, a {{collection, pipeline}} document, or a {{pipelines: [...]}} container")
}

fn build_config(cli: &Cli) -> Config {
    let dialect: Box<dyn Dialect> = if cli.generic_dialect {
        Box::new(GenericJson)
    } else {
        Box::new(OracleJson)
    };
    let mut config = Config::new(dialect).with_inline_literals(cli.inline);
    if let Some(schema) = &cli.schema {
        config = config.with_schema(schema.clone());
    }
    config
}

fn format_output(name: Option<&str>, out: &CompileOutput, inline: bool, pretty: bool) -> String {
    let mut s = String::new();
    if let Some(name) = name {
        s.push_str(&format!("-- Pipeline: {name}\n"));
    }
    if pretty {
        s.push_str(&pretty_print(&out.sql));
    } else {
        s.push_str(&out.sql);
    }
    s.push('\n');
    if !inline {
        let binds = out
            .binds
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        s.push_str(&format!("-- Bind variables: [{binds}]\n"));
    }
    s
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let text = fs::read_to_string(&cli.input)
        .map_err(|e| aggsql::Error::io(format!("reading {}: {e}", cli.input.display())))?;
    let raw: Json = serde_json::from_str(&text).context("parsing input as JSON")?;
    let config = build_config(cli);
    let input = parse_input(&raw)?;

    let rendered = match input {
        Input::Bare(pipeline) => {
            let collection = cli
                .collection
                .clone()
                .context("--collection is required for a bare pipeline array")?;
            let out = translate(collection, &pipeline, &config)?;
            format_output(None, &out, cli.inline, cli.pretty)
        }
        Input::Named(np) => {
            let out = translate(np.collection, &np.pipeline, &config)?;
            format_output(np.name.as_deref(), &out, cli.inline, cli.pretty)
        }
        Input::Multi(items) => {
            let mut chunks = Vec::with_capacity(items.len());
            for np in items {
                let out = translate(np.collection.clone(), &np.pipeline, &config)?;
                chunks.push(format_output(np.name.as_deref().or(Some(&np.collection)), &out, cli.inline, cli.pretty));
            }
            chunks.join("\n")
        }
    };
    Ok(rendered)
}

/// Entrypoint called by [`crate::main`].
pub fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp(None).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(rendered) => {
            match &cli.output {
                Some(path) => fs::write(path, rendered)
                    .map_err(|e| aggsql::Error::io(format!("writing {}: {e}", path.display())))?,
                None => print!("{rendered}"),
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{err:#}");
            let exit_code = match err.downcast_ref::<aggsql::Error>() {
                Some(e) => e.exit_code(),
                None => 1,
            };
            exit(exit_code);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[test]
    fn missing_input_file_maps_to_an_io_error_with_exit_code_2() {
        let cli = Cli::parse_from(["translator", "/no/such/file.json"]);
        let err = run(&cli).unwrap_err();
        let e = err.downcast_ref::<aggsql::Error>().expect("should downcast to aggsql::Error");
        assert!(matches!(e.reason(), aggsql::Reason::IoError(_)));
        assert_eq!(e.exit_code(), 2);
    }
}
