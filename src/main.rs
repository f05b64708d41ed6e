//! cstruct-diff CLI
//!
//! C の struct 定義を2つの版で比較する、または値埋め込み閉包を求めて JSON で出力する

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser as ClapParser;
use serde::Serialize;

use cstruct_diff::analysis::{embedded_structs_in, load_model, read_source};
use cstruct_diff::{AnalysisBuilder, AnalysisConfig, DiffReport, compare_files};

/// コマンドライン引数
#[derive(ClapParser)]
#[command(name = "cstruct-diff")]
#[command(version, about = "Conditional-aware C struct diff and embedding analysis")]
struct Cli {
    /// 入力Cファイル（比較時は古い版）
    left: PathBuf,

    /// 比較対象の新しい版
    right: Option<PathBuf>,

    /// 対象の struct / union 名
    #[arg(short = 's', long = "struct")]
    struct_name: String,

    /// 値として埋め込まれた構造体の閉包を出力
    #[arg(long = "embedded")]
    embedded: bool,

    /// 構造体モデルをダンプ
    #[arg(long = "dump-model")]
    dump_model: bool,

    /// 真とする設定シンボル (-D)
    #[arg(short = 'D', long = "define")]
    define: Vec<String>,

    /// 偽とする設定シンボル (-U)
    #[arg(short = 'U', long = "undefine")]
    undefine: Vec<String>,

    /// 読み飛ばす注釈マクロを追加（複数指定可）
    #[arg(long = "annotation")]
    annotation: Vec<String>,

    /// 出力ファイル（省略時は標準出力）
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// 詳細なログ出力
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Serialize)]
struct EmbeddingOutput<'a> {
    #[serde(rename = "struct")]
    name: &'a str,
    embedded: Vec<String>,
}

#[derive(Serialize)]
struct DiffOutput<'a> {
    #[serde(rename = "struct")]
    name: &'a str,
    #[serde(flatten)]
    report: DiffReport,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    execute(&cli)
}

/// 解析を実行し、成功したときだけ出力先を開いて書き込む
fn execute(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(cli);

    let json = if cli.embedded {
        run_embedded(cli, &config)?
    } else if cli.dump_model || cli.right.is_none() {
        run_dump_model(cli, &config)?
    } else {
        run_diff(cli, &config)?
    };

    write_output(cli.output.as_deref(), &json)?;
    Ok(())
}

fn write_output(path: Option<&Path>, json: &str) -> io::Result<()> {
    let mut out: Box<dyn Write> = match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    writeln!(out, "{}", json)?;
    out.flush()
}

fn build_config(cli: &Cli) -> AnalysisConfig {
    let mut builder = AnalysisBuilder::new().verbose(cli.verbose);
    for name in &cli.define {
        builder = builder.define(name.as_str());
    }
    for name in &cli.undefine {
        builder = builder.undefine(name.as_str());
    }
    for name in &cli.annotation {
        builder = builder.annotation(name.as_str());
    }
    builder.build()
}

fn run_embedded(cli: &Cli, config: &AnalysisConfig) -> Result<String, Box<dyn std::error::Error>> {
    let source = read_source(&cli.left)?;
    let origin = cli.left.display().to_string();
    let embedded = embedded_structs_in(&source, &origin, &cli.struct_name, config)?;
    Ok(serde_json::to_string_pretty(&EmbeddingOutput {
        name: &cli.struct_name,
        embedded,
    })?)
}

fn run_dump_model(cli: &Cli, config: &AnalysisConfig) -> Result<String, Box<dyn std::error::Error>> {
    let mut models = Vec::new();
    for path in std::iter::once(&cli.left).chain(cli.right.as_ref()) {
        let source = read_source(path)?;
        let origin = path.display().to_string();
        let model = load_model(&source, &origin, &cli.struct_name, config)?;
        let model = match &config.assignment {
            Some(assignment) => model.project(assignment),
            None => model,
        };
        models.push(model);
    }

    if models.len() == 1 {
        Ok(serde_json::to_string_pretty(&models[0])?)
    } else {
        Ok(serde_json::to_string_pretty(&models)?)
    }
}

fn run_diff(cli: &Cli, config: &AnalysisConfig) -> Result<String, Box<dyn std::error::Error>> {
    let right = cli.right.as_ref().ok_or("Second input file is required")?;
    let comparison = compare_files(&cli.left, right, &cli.struct_name, config)?;
    Ok(serde_json::to_string_pretty(&DiffOutput {
        name: &cli.struct_name,
        report: comparison.report(),
    })?)
}
