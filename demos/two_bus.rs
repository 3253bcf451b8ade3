use rustpower_pf::{
    prelude::{config::PowerFlowConfig, flows::{branch_table, bus_table}, *},
    testcases,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let net = testcases::two_bus().compile()?;
    let res = run_power_flow(&net, &PowerFlowConfig::default().with_tol(1e-8))?.into_converged()?;
    println!("converged in {} iterations", res.iterations);
    println!("{}", bus_table(&net, &res.v)?);
    let flows = res.branch_flows(&net)?;
    println!("{}", branch_table(&net, &flows));
    Ok(())
}
