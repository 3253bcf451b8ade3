use rustpower_pf::{
    prelude::{
        config::{Acceleration, PowerFlowConfig, SolverMethod},
        *,
    },
    testcases,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let net = testcases::five_bus().compile()?;
    let configs = [
        PowerFlowConfig::new(SolverMethod::NewtonRaphson),
        PowerFlowConfig::new(SolverMethod::LevenbergMarquardt),
        PowerFlowConfig::new(SolverMethod::Helm).with_acceleration(Acceleration::None),
        PowerFlowConfig::new(SolverMethod::Helm).with_acceleration(Acceleration::Pade),
        PowerFlowConfig::new(SolverMethod::Helm).with_acceleration(Acceleration::Wynn),
    ];

    let reference = run_power_flow(&net, &configs[0].clone().with_tol(1e-12))?.into_converged()?;
    println!("method,\tacceleration,\tstatus,\titerations,\tmismatch,\tmax |dV|");
    for cfg in &configs {
        let start = std::time::Instant::now();
        let res = run_power_flow(&net, &cfg.clone().with_tol(1e-8))?;
        let elapsed = start.elapsed();
        let diff = res
            .v
            .iter()
            .zip(reference.v.iter())
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max);
        println!(
            "{},\t{},\t{},\t{},\t{:.3e},\t{:.3e}\t({:?})",
            cfg.method, cfg.acceleration, res.status, res.iterations, res.mismatch, diff, elapsed
        );
    }

    // cap the generator at bus 3 and let the solver enforce it
    let limited = net.with_reactive_limits(vec![ReactiveLimit::new(3, -10.0, 10.0)])?;
    let cfg = PowerFlowConfig::default().with_retry(true).with_q_control(true);
    let res = run_power_flow(&limited, &cfg)?;
    println!(
        "\nreactive limits: {} via {:?}, switched to PQ: {:?}",
        res.status, res.methods_tried, res.switched_to_pq
    );
    Ok(())
}
