//! Python extension module (feature `python`).
//!
//! Exposes one class per sequence family, driving the real board through SpinAPI:
//!
//! ```python
//! from pbexpctrl_backend import PulseBlasterPulsedODMR, PulseTrainWidthError
//!
//! pulser = PulseBlasterPulsedODMR(pb_board_number=0, rf_pulse_justify="left")
//! n_clock_cycles = pulser.program_pulser_state(rf_width=2e-6)
//! pulser.start()
//! metadata = pulser.experimental_conditions()
//! ```
//!
//! Constructor keyword arguments are the parameter fields of the family (seconds for
//! times); anything not given keeps its default. Errors map to
//! `PulseBlasterInitError` (board unreachable), `PulseTrainWidthError` (infeasible
//! sequence) and `PulseBlasterError` (everything else).

use numpy::{IntoPyArray, PyArray2};
use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::de::DeserializeOwned;

use pbcompiler_backend::*;

use crate::error::PulserError;
use crate::experiment::*;
use crate::spinapi::SpinApiDriver;

create_exception!(pbexpctrl_backend, PulseBlasterError, PyException);
create_exception!(pbexpctrl_backend, PulseBlasterInitError, PulseBlasterError);
create_exception!(pbexpctrl_backend, PulseTrainWidthError, PulseBlasterError);

/// The error message followed by every error it was caused by.
fn describe(err: &PulserError) -> String {
    let mut message = err.to_string();
    let mut source = err.cause();
    while let Some(cause) = source {
        message.push_str(&format!(" (after: {cause})"));
        source = cause.cause();
    }
    message
}

impl From<PulserError> for PyErr {
    fn from(err: PulserError) -> PyErr {
        let message = describe(&err);
        match err {
            PulserError::Initialization { .. } => PulseBlasterInitError::new_err(message),
            PulserError::Timing(_) => PulseTrainWidthError::new_err(message),
            _ => PulseBlasterError::new_err(message),
        }
    }
}

fn params_from_kwargs<P: DeserializeOwned + Default>(
    py: Python<'_>,
    kwargs: Option<&PyDict>,
) -> PyResult<P> {
    let Some(kwargs) = kwargs else {
        return Ok(P::default());
    };
    let json: String = py
        .import("json")?
        .call_method1("dumps", (kwargs,))?
        .extract()?;
    serde_json::from_str(&json).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn condition_to_py(py: Python<'_>, value: ConditionValue) -> PyObject {
    match value {
        ConditionValue::Seconds(t) => t.into_py(py),
        ConditionValue::Count(n) => n.into_py(py),
        ConditionValue::Text(s) => s.into_py(py),
    }
}

macro_rules! impl_pulser_boilerplate {
    ($py_type: ident, $params: ty) => {
        #[pymethods]
        impl $py_type {
            #[new]
            #[pyo3(signature = (**kwargs))]
            fn new(py: Python<'_>, kwargs: Option<&PyDict>) -> PyResult<Self> {
                let params: $params = params_from_kwargs(py, kwargs)?;
                Ok(Self {
                    inner: PulseBlaster::new(params, SpinApiDriver::new()),
                })
            }

            fn experimental_conditions(&self, py: Python<'_>) -> PyResult<PyObject> {
                let dict = PyDict::new(py);
                for (name, value) in self.inner.experimental_conditions() {
                    dict.set_item(name, condition_to_py(py, value))?;
                }
                Ok(dict.into())
            }

            fn start(&mut self) -> PyResult<()> {
                Ok(self.inner.start()?)
            }

            fn stop(&mut self) -> PyResult<()> {
                Ok(self.inner.stop()?)
            }

            fn reset(&mut self) -> PyResult<()> {
                Ok(self.inner.reset()?)
            }

            /// Output levels of the last programmed cycle, one row per pin.
            fn calc_levels<'py>(&self, py: Python<'py>, nsamps: usize) -> PyResult<&'py PyArray2<f64>> {
                let last = self.inner.last_programmed().ok_or_else(|| {
                    PulseBlasterError::new_err("program_pulser_state has not succeeded yet")
                })?;
                Ok(last.program.calc_levels(nsamps).into_pyarray(py))
            }

            /// Pins of the last programmed cycle, in `calc_levels` row order.
            fn pins(&self) -> Vec<u8> {
                self.inner
                    .last_programmed()
                    .map(|last| last.program.pins().iter().map(|pin| pin.index()).collect())
                    .unwrap_or_default()
            }
        }
    };
}

#[pyclass(name = "PulseBlasterHoldAOM")]
pub struct PyHoldAom {
    inner: PulseBlasterHoldAom<SpinApiDriver>,
}

#[pyclass(name = "PulseBlasterCWODMR")]
pub struct PyCwOdmr {
    inner: PulseBlasterCwOdmr<SpinApiDriver>,
}

#[pyclass(name = "PulseBlasterPulsedODMR")]
pub struct PyPulsedOdmr {
    inner: PulseBlasterPulsedOdmr<SpinApiDriver>,
}

#[pyclass(name = "PulseBlasterRamHahnDD")]
pub struct PyRamHahnDd {
    inner: PulseBlasterRamHahnDd<SpinApiDriver>,
}

impl_pulser_boilerplate!(PyHoldAom, HoldOpenParams);
impl_pulser_boilerplate!(PyCwOdmr, CwOdmrParams);
impl_pulser_boilerplate!(PyPulsedOdmr, PulsedOdmrParams);
impl_pulser_boilerplate!(PyRamHahnDd, RamseyHahnDdParams);

#[pymethods]
impl PyHoldAom {
    fn program_pulser_state(&mut self) -> PyResult<u64> {
        Ok(self.inner.program_pulser_state(&())?)
    }
}

#[pymethods]
impl PyCwOdmr {
    #[pyo3(signature = (rf_width = None))]
    fn program_pulser_state(&mut self, rf_width: Option<f64>) -> PyResult<u64> {
        Ok(self
            .inner
            .program_pulser_state(&CwOdmrOverrides { rf_width })?)
    }
}

#[pymethods]
impl PyPulsedOdmr {
    #[pyo3(signature = (rf_width = None))]
    fn program_pulser_state(&mut self, rf_width: Option<f64>) -> PyResult<u64> {
        Ok(self
            .inner
            .program_pulser_state(&PulsedOdmrOverrides { rf_width })?)
    }

    #[getter]
    fn delay_rf_channel(&self) -> Option<f64> {
        self.inner
            .last_programmed()
            .and_then(|last| last.diagnostics.delay_rf_channel)
    }
}

#[pymethods]
impl PyRamHahnDd {
    #[pyo3(signature = (free_precession_time = None, n_refocussing_pi_pulses = None))]
    fn program_pulser_state(
        &mut self,
        free_precession_time: Option<f64>,
        n_refocussing_pi_pulses: Option<u32>,
    ) -> PyResult<u64> {
        Ok(self.inner.program_pulser_state(&RamseyHahnDdOverrides {
            free_precession_time,
            n_refocussing_pi_pulses,
        })?)
    }

    /// Returns `([(start, duration), ...], half_cycle_width)` in seconds.
    fn compute_rf_pulse_sequence(
        &self,
        free_precession_time: f64,
        n_refocussing_pi_pulses: u32,
    ) -> PyResult<(Vec<(f64, f64)>, f64)> {
        let seq = self
            .inner
            .compute_rf_pulse_sequence(free_precession_time, n_refocussing_pi_pulses)?;
        Ok((seq.pulses, seq.half_cycle_width))
    }

    #[getter]
    fn pi_pulse_start_times(&self) -> Vec<f64> {
        self.inner
            .last_programmed()
            .map(|last| last.diagnostics.pi_pulse_start_times.clone())
            .unwrap_or_default()
    }

    #[getter]
    fn left_pi_over_2_pulse_start(&self) -> Option<f64> {
        self.inner
            .last_programmed()
            .and_then(|last| last.diagnostics.left_pi_over_2_pulse_start)
    }

    #[getter]
    fn right_pi_over_2_pulse_start(&self) -> Option<f64> {
        self.inner
            .last_programmed()
            .and_then(|last| last.diagnostics.right_pi_over_2_pulse_start)
    }
}

#[pymodule]
fn pbexpctrl_backend(py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyHoldAom>()?;
    m.add_class::<PyCwOdmr>()?;
    m.add_class::<PyPulsedOdmr>()?;
    m.add_class::<PyRamHahnDd>()?;
    m.add("PulseBlasterError", py.get_type::<PulseBlasterError>())?;
    m.add("PulseBlasterInitError", py.get_type::<PulseBlasterInitError>())?;
    m.add("PulseTrainWidthError", py.get_type::<PulseTrainWidthError>())?;
    Ok(())
}
