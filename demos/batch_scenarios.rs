use nalgebra::DVector;
use num_complex::Complex64;
use rustpower_pf::{
    prelude::{
        config::{PowerFlowConfig, SolverMethod},
        *,
    },
    testcases,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let net = testcases::five_bus().compile()?;
    // load scaling sweep
    let scenarios: Vec<DVector<Complex64>> = (0..=12)
        .map(|k| {
            let scale = 0.5 + 0.125 * k as f64;
            net.s_bus().map(|s| s * scale)
        })
        .collect();

    for method in [SolverMethod::NewtonRaphson, SolverMethod::Helm] {
        let cfg = PowerFlowConfig::new(method).with_tol(1e-8).with_ncoeff(40);
        let results = solve_batch(&net, &scenarios, &cfg)?;
        println!("{method}");
        println!("scale,\tstatus,\titerations,\tmin |V|");
        for (k, res) in results.iter().enumerate() {
            let v_min = res.v.iter().map(|e| e.norm()).fold(f64::INFINITY, f64::min);
            println!(
                "{:.3},\t{},\t{},\t{:.5}",
                0.5 + 0.125 * k as f64,
                res.status,
                res.iterations,
                v_min
            );
        }
    }
    Ok(())
}
