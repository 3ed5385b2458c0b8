use criterion::{Criterion, criterion_group, criterion_main};
use nalgebra::Vector3;
use ndarray::Array2;
use spinwave::*;

fn line_scan(n_q: usize) -> Array2<f64> {
    let mut hkl = Array2::zeros((3, n_q));
    for q in 0..n_q {
        // Stay off the zone center to avoid the regularized Cholesky path.
        hkl[[0, q]] = 0.01 + 0.48 * q as f64 / n_q as f64;
    }
    hkl
}

fn spectrum_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("Spectrum");

    let chain = {
        let site = Site::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 0.5));
        SpinWaveModel::new(vec![site], vec![Coupling::heisenberg(0, 0, Vector3::x(), -1.0)])
    };
    let hkl = line_scan(200);
    let options = SpectrumOptions::default();

    group.bench_function("ferromagnetic chain, 200 Q", |b| {
        b.iter(|| chain.spectrum(&hkl, &options).unwrap())
    });

    let neel = {
        let sites = vec![
            Site::new(Vector3::zeros(), Vector3::new(0.0, 0.0, 0.5)),
            Site::new(Vector3::new(0.5, 0.0, 0.0), Vector3::new(0.0, 0.0, -0.5)),
        ];
        let couplings = vec![
            Coupling::heisenberg(0, 1, Vector3::zeros(), 1.0),
            Coupling::heisenberg(1, 0, Vector3::x(), 1.0),
        ];
        let mut model = SpinWaveModel::new(sites, couplings);
        model.n_ext = [2, 1, 1];
        model
    };

    group.bench_function("antiferromagnetic chain, 200 Q", |b| {
        b.iter(|| neel.spectrum(&hkl, &options).unwrap())
    });

    let neutron = SpectrumOptions {
        neutron_output: true,
        fast_mode: true,
        ..Default::default()
    };
    group.bench_function("neutron projection, fast mode", |b| {
        b.iter(|| neel.spectrum(&hkl, &neutron).unwrap())
    });
}

criterion_group!(benches, spectrum_benchmarks);
criterion_main!(benches);
