use faer::Mat;
use log::info;

use crate::conductivity::{self, FiniteSize, Method, ModeConductivity, SolverInput};
use crate::config::Config;
use crate::error::Error;
use crate::forceconstants::{SecondOrder, ThirdOrder};
use crate::grid::SamplingGrid;
use crate::harmonic::{chi, Diagonalizer, HarmonicResult};
use crate::scattering::{project_bandwidths, ScatteringContext, ScatteringResult};
use crate::structure::{AtomicConfiguration, ReplicatedConfiguration};
use crate::thermal;
use crate::C64;

/// Owning container of the whole calculation.
///
/// Inputs are fixed at construction; derived quantities live in `Option`
/// caches populated by the `ensure_*` methods on first demand and never
/// recomputed; build a new container to change an input. Conductivity
/// tensors are derived on request and not cached.
pub struct Phonons {
    config: Config,
    configuration: AtomicConfiguration,
    replicated: ReplicatedConfiguration,
    grid: SamplingGrid,
    second: SecondOrder,
    third: Option<ThirdOrder>,
    mapping: Vec<usize>,
    harmonic: Option<HarmonicResult>,
    flux: Option<Vec<[Mat<C64>; 3]>>,
    occupations: Option<Mat<f64>>,
    heat_capacity: Option<Mat<f64>>,
    scattering: Option<ScatteringResult>,
}

impl Phonons {
    pub fn new(
        configuration: AtomicConfiguration,
        second: SecondOrder,
        third: Option<ThirdOrder>,
        config: Config,
    ) -> Result<Self, Error> {
        config.validate()?;
        if second.n_atoms() != configuration.n_atoms() {
            return Err(Error::InvalidConfiguration(format!(
                "second order holds {} atoms, configuration holds {}",
                second.n_atoms(),
                configuration.n_atoms()
            )));
        }
        if second.supercell() != config.supercell {
            return Err(Error::InvalidConfiguration(format!(
                "second order was built for supercell {:?}, config says {:?}",
                second.supercell(),
                config.supercell
            )));
        }
        if let Some(third) = &third {
            if third.n_modes() != second.n_modes() || third.n_replicas() != second.n_replicas() {
                return Err(Error::InvalidConfiguration(
                    "third order shape does not match the second order".into(),
                ));
            }
        }
        let replicated = ReplicatedConfiguration::new(&configuration, config.supercell)?;
        let grid = SamplingGrid::new(config.kpts)?;
        let mapping = (0..grid.n_points()).collect();
        Ok(Phonons {
            config,
            configuration,
            replicated,
            grid,
            second,
            third,
            mapping,
            harmonic: None,
            flux: None,
            occupations: None,
            heat_capacity: None,
            scattering: None,
        })
    }

    /// Install the wavevector -> irreducible-representative mapping supplied
    /// by an external symmetry search; identity by default.
    pub fn with_symmetry_mapping(mut self, mapping: Vec<usize>) -> Result<Self, Error> {
        let nk = self.grid.n_points();
        if mapping.len() != nk {
            return Err(Error::InvalidConfiguration(format!(
                "symmetry mapping covers {} wavevectors, grid has {}",
                mapping.len(),
                nk
            )));
        }
        for (ik, &irr) in mapping.iter().enumerate() {
            if irr >= nk || mapping[irr] != irr {
                return Err(Error::InvalidConfiguration(format!(
                    "symmetry mapping entry {} -> {} does not point into the irreducible wedge",
                    ik, irr
                )));
            }
        }
        self.mapping = mapping;
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grid(&self) -> &SamplingGrid {
        &self.grid
    }

    pub fn harmonic(&self) -> Option<&HarmonicResult> {
        self.harmonic.as_ref()
    }

    pub fn scattering(&self) -> Option<&ScatteringResult> {
        self.scattering.as_ref()
    }

    /// Summed-channel bandwidths, if the scattering kernel has run.
    pub fn bandwidth(&self) -> Option<Mat<f64>> {
        self.scattering.as_ref().map(ScatteringResult::total_bandwidth)
    }

    fn diagonalizer(&self) -> Diagonalizer<'_> {
        Diagonalizer::new(
            &self.second,
            &self.configuration,
            &self.replicated,
            self.config.distance_threshold,
        )
    }

    pub fn ensure_harmonic(&mut self) -> Result<(), Error> {
        if self.harmonic.is_some() {
            return Ok(());
        }
        let mut result = self.diagonalizer().diagonalize_grid(&self.grid)?;
        if self.config.is_acoustic_sum {
            // Γ sits at grid index 0; the sum rule pins its three acoustic
            // modes to zero exactly
            for mu in 0..3 {
                result.frequency[(0, mu)] = 0.0;
                for a in 0..3 {
                    result.velocity[0][(mu, a)] = 0.0;
                }
            }
        }
        self.harmonic = Some(result);
        Ok(())
    }

    pub fn ensure_occupations(&mut self) -> Result<(), Error> {
        if self.occupations.is_some() {
            return Ok(());
        }
        self.ensure_harmonic()?;
        let harmonic = self.harmonic.as_ref().expect("just ensured");
        self.occupations = Some(thermal::occupations(
            &harmonic.frequency,
            self.config.temperature,
            self.config.is_classic,
        ));
        Ok(())
    }

    pub fn ensure_heat_capacity(&mut self) -> Result<(), Error> {
        if self.heat_capacity.is_some() {
            return Ok(());
        }
        self.ensure_occupations()?;
        let harmonic = self.harmonic.as_ref().expect("just ensured");
        let occupations = self.occupations.as_ref().expect("just ensured");
        self.heat_capacity = Some(thermal::heat_capacity(
            &harmonic.frequency,
            occupations,
            self.config.temperature,
            self.config.is_classic,
        ));
        Ok(())
    }

    fn ensure_flux(&mut self) -> Result<(), Error> {
        if self.flux.is_some() {
            return Ok(());
        }
        self.ensure_harmonic()?;
        let harmonic = self.harmonic.as_ref().expect("just ensured");
        let flux = self.diagonalizer().flux_operators(&self.grid, harmonic);
        self.flux = Some(flux);
        Ok(())
    }

    /// Run the scattering kernel if its output (or its scattering matrix) is
    /// not available yet.
    pub fn ensure_scattering(&mut self, need_matrix: bool) -> Result<(), Error> {
        if let Some(scattering) = &self.scattering {
            if scattering.matrix.is_some() || !need_matrix {
                return Ok(());
            }
            info!("scattering matrix requested, re-running the kernel over the full grid");
        }
        if self.third.is_none() {
            return Err(Error::MissingBandwidths(
                "third-order force constants were not provided",
            ));
        }
        self.ensure_occupations()?;

        let harmonic = self.harmonic.as_ref().expect("just ensured");
        let occupations = self.occupations.as_ref().expect("just ensured");
        let third = self.third.as_ref().expect("checked above");
        let cell_inv = self.configuration.cell_inv();

        let nk = self.grid.n_points();
        let n_replicas = self.replicated.n_replicas;
        let mut chi_table = Mat::<C64>::zeros(nk, n_replicas);
        for ik in 0..nk {
            let chi_k = chi(
                self.grid.q_vector(ik),
                self.replicated.wrapped_replica_vectors.as_ref(),
                cell_inv.as_ref(),
            );
            for l in 0..n_replicas {
                chi_table[(ik, l)] = chi_k[l];
            }
        }

        let ctx = ScatteringContext {
            grid: &self.grid,
            harmonic,
            occupations,
            chi: &chi_table,
            mapping: &self.mapping,
            sigma_in: self.config.sigma_in,
            broadening_shape: self.config.broadening_shape,
            gvecs_over_k: thermal::gvecs_over_k(cell_inv.as_ref(), self.grid.kpts()),
        };
        let result = project_bandwidths(third, &self.configuration.masses, &ctx, need_matrix);
        self.scattering = Some(result);
        Ok(())
    }

    /// Mode-resolved conductivity under the requested closure, lazily
    /// evaluating whatever prerequisite is missing.
    pub fn conductivity(&mut self, method: Method) -> Result<ModeConductivity, Error> {
        match method {
            Method::Rta => self.ensure_scattering(false)?,
            Method::Qhgk => {
                // a uniform bandwidth override stands in for the kernel
                if self.config.third_bandwidth.is_none() {
                    self.ensure_scattering(false)?;
                }
                self.ensure_flux()?;
            }
            Method::Inverse | Method::SelfConsistent => self.ensure_scattering(true)?,
        }
        self.ensure_heat_capacity()?;

        let harmonic = self
            .harmonic
            .as_ref()
            .ok_or(Error::MissingBandwidths("harmonic results unavailable"))?;
        let heat_capacity = self
            .heat_capacity
            .as_ref()
            .ok_or(Error::MissingBandwidths("heat capacities unavailable"))?;
        let bandwidth = match &self.scattering {
            Some(scattering) => scattering.total_bandwidth(),
            None if method == Method::Qhgk && self.config.third_bandwidth.is_some() => {
                Mat::<f64>::zeros(harmonic.frequency.nrows(), harmonic.frequency.ncols())
            }
            None => return Err(Error::MissingBandwidths("scattering results unavailable")),
        };

        let finite_size = match method {
            Method::Rta | Method::SelfConsistent => self.config.length.map(|length| FiniteSize {
                method: self.config.finite_size_method,
                length,
                axis: self.config.axis,
            }),
            _ => None,
        };
        let input = SolverInput {
            frequency: &harmonic.frequency,
            velocity: &harmonic.velocity,
            heat_capacity,
            bandwidth: &bandwidth,
            scattering_matrix: self.scattering.as_ref().and_then(|s| s.matrix.as_ref()),
            flux_operators: self.flux.as_deref(),
            volume: self.configuration.volume(),
            finite_size,
            tolerance: self.config.tolerance,
            n_iterations: self.config.n_iterations,
            third_bandwidth: self.config.third_bandwidth,
        };
        conductivity::calculate(&input, method)
    }
}
