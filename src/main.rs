use std::fs;

use anyhow::{Context, Result};
use bayesdag::ddag::common::logging::format_table;
use bayesdag::ddag::common::setup::{CliCommand, init_logging, parse_configuration_options};
use bayesdag::{DiscreteDag, FitConfig, InferenceConfig, NetworkFile, Node, print_blue, print_green, print_red, print_yellow};
use log::info;
use ndarray::{Array2, ArrayD};

fn label(names: &[String], nodes: &[Node]) -> String {
    nodes
        .iter()
        .map(|&n| names.get(n).cloned().unwrap_or_else(|| n.to_string()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_table(table: &ArrayD<f64>) {
    for line in format_table(table) {
        println!("  {}", line);
    }
}

fn read_codes(path: &str) -> Result<Array2<usize>> {
    let json = fs::read_to_string(path).with_context(|| format!("reading data file {}", path))?;
    let rows: Vec<Vec<usize>> = serde_json::from_str(&json).context("data must be a JSON array of rows of codes")?;
    let ncols = rows.first().map_or(0, Vec::len);
    let flat: Vec<usize> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), ncols), flat).context("data rows have different lengths")
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        print_red!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_configuration_options()?;
    let mut config = InferenceConfig::from_env();
    if let Some(schedule) = options.schedule {
        config.schedule = schedule;
    }
    if options.seed.is_some() {
        config.seed = options.seed;
    }
    info!("inference config: {:?}", config);

    let file = NetworkFile::load_from_file(&options.network)?;
    let (ddag, names) = file.to_ddag()?;
    info!("loaded network with {} nodes and {} arcs", ddag.nnodes(), ddag.arcs().len());

    match options.command {
        CliCommand::Marginal { nodes } => {
            let table = ddag.get_marginals_with(&nodes, false, config.schedule)?;
            print_blue!("P({})", label(&names, &nodes));
            print_table(&table);
        }
        CliCommand::Conditional { marginal, cond, sampled } => {
            print_blue!("P({} | {})", label(&names, &marginal), label(&names, &cond));
            if sampled {
                let mut rng = config.rng();
                let estimate = ddag.get_conditional_importance_sampling(
                    &marginal,
                    &cond,
                    None,
                    config.nparticles,
                    &mut rng,
                )?;
                let mut codes: Vec<&Vec<usize>> = estimate.conditionals.keys().collect();
                codes.sort();
                for assignment in codes {
                    print_yellow!(
                        "given {:?} (estimated probability {:.4})",
                        assignment,
                        estimate.marginals[assignment]
                    );
                    print_table(&estimate.conditionals[assignment]);
                }
            } else {
                print_table(&ddag.get_conditional(&marginal, &cond)?);
            }
        }
        CliCommand::Sample { n } => {
            let mut rng = config.rng();
            let samples = ddag.sample(n, &mut rng)?;
            let nodes: Vec<Node> = ddag.nodes().iter().copied().collect();
            print_blue!("{}", label(&names, &nodes));
            for row in samples.rows() {
                let values = nodes
                    .iter()
                    .zip(row.iter())
                    .map(|(&node, &code)| Ok(ddag.alphabet(node)?[code].to_string()))
                    .collect::<Result<Vec<_>>>()?;
                println!("  {}", values.join(", "));
            }
        }
        CliCommand::Intervene { node, value, query } => {
            let intervened = ddag.get_hard_interventional_dag(node, value)?;
            let query = if query.is_empty() {
                intervened.nodes().iter().copied().collect()
            } else {
                query
            };
            print_yellow!("do({} = {})", label(&names, &[node]), value);
            for target in query {
                let table = intervened.get_marginal(target)?.into_dyn();
                print_blue!("P({})", label(&names, &[target]));
                print_table(&table);
            }
        }
        CliCommand::Fit { data, method, output } => {
            let codes = read_codes(&data)?;
            let fit_config = FitConfig {
                method,
                ..FitConfig::from_env()
            };
            let method = fit_config.fit_method()?;
            let mut rng = config.rng();
            let fitted = DiscreteDag::fit(
                ddag.dag(),
                codes.view(),
                &method,
                Some(ddag.node_alphabets().clone()),
                &mut rng,
            )?;
            for &node in fitted.nodes() {
                print_blue!(
                    "P({} | {})",
                    label(&names, &[node]),
                    label(&names, fitted.parents(node)?)
                );
                print_table(fitted.conditional(node)?);
            }
            if let Some(path) = output {
                let mut saved = NetworkFile::new(&fitted)?;
                for cpd in saved.network.cpds.iter_mut() {
                    rename(&mut cpd.variable, &names);
                    for parent in cpd.evidence.iter_mut() {
                        rename(parent, &names);
                    }
                }
                saved.alphabets = saved
                    .alphabets
                    .into_iter()
                    .map(|(mut key, alphabet)| {
                        rename(&mut key, &names);
                        (key, alphabet)
                    })
                    .collect();
                saved.save_to_file(&path)?;
                print_green!("wrote fitted network to {}", path);
            }
        }
    }
    Ok(())
}

/// Replaces a node id written by `NetworkFile::new` with the loaded variable name.
fn rename(id: &mut String, names: &[String]) {
    if let Some(name) = id.parse::<usize>().ok().and_then(|ix| names.get(ix)) {
        *id = name.clone();
    }
}
