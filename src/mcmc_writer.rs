//! Turns transitions into rows for the sample and diagnostic writers.
//!
//! The sample output holds `lp__`, `accept_stat__`, the kernel statistics and
//! the values produced by [`Model::write_array`]. The diagnostic output holds
//! the same leading columns followed by the unconstrained position and the
//! kernel diagnostics.

use std::time::Duration;

use rand::Rng;

use crate::{
    callbacks::Logger,
    chain::{KernelStats, Transition, TransitionKernel},
    error::{NutsError, Result},
    model::{LogpError, Model},
    storage::Writer,
};

pub struct McmcWriter<'a, S: ?Sized, D: ?Sized> {
    sample_writer: &'a mut S,
    diagnostic_writer: &'a mut D,
    row: Vec<f64>,
    output: Vec<f64>,
    num_outputs: usize,
}

fn leading_names() -> impl Iterator<Item = String> {
    ["lp__", "accept_stat__"].into_iter().map(String::from)
}

impl<'a, S, D> McmcWriter<'a, S, D>
where
    S: Writer + ?Sized,
    D: Writer + ?Sized,
{
    pub fn new(sample_writer: &'a mut S, diagnostic_writer: &'a mut D) -> Self {
        Self {
            sample_writer,
            diagnostic_writer,
            row: Vec::new(),
            output: Vec::new(),
            num_outputs: 0,
        }
    }

    pub fn write_sample_names<K, M>(&mut self, kernel: &K, model: &M) -> Result<()>
    where
        K: TransitionKernel,
        M: Model,
    {
        let outputs = model.output_names();
        self.num_outputs = outputs.len();
        let names: Vec<String> = leading_names()
            .chain(kernel.stat_names())
            .chain(outputs)
            .collect();
        self.sample_writer.write_names(&names)?;
        Ok(())
    }

    pub fn write_diagnostic_names<K, M>(&mut self, kernel: &K, model: &M) -> Result<()>
    where
        K: TransitionKernel,
        M: Model,
    {
        let names: Vec<String> = leading_names()
            .chain(kernel.stat_names())
            .chain(model.param_names())
            .chain(kernel.diagnostic_names())
            .collect();
        self.diagnostic_writer.write_names(&names)?;
        Ok(())
    }

    /// Write one draw to the sample output.
    ///
    /// If the model fails to produce its output values with a recoverable
    /// error, the values are written as NaN.
    pub fn write_sample_params<M, R, T>(
        &mut self,
        rng: &mut R,
        transition: &Transition<T>,
        model: &M,
    ) -> Result<()>
    where
        M: Model,
        R: Rng + ?Sized,
        T: KernelStats,
    {
        self.row.clear();
        self.row.push(transition.logp);
        self.row.push(transition.accept_stat);
        transition.stats.write_stats(&mut self.row);

        match model.write_array(rng, &transition.state.continuous, &mut self.output) {
            Ok(()) => self.row.extend_from_slice(&self.output),
            Err(err) if err.is_recoverable() => self
                .row
                .extend(std::iter::repeat(f64::NAN).take(self.num_outputs)),
            Err(err) => return Err(NutsError::LogpFailure(Box::new(err))),
        }

        self.sample_writer.write_values(&self.row)?;
        Ok(())
    }

    pub fn write_diagnostic_params<T: KernelStats>(
        &mut self,
        transition: &Transition<T>,
    ) -> Result<()> {
        self.row.clear();
        self.row.push(transition.logp);
        self.row.push(transition.accept_stat);
        transition.stats.write_stats(&mut self.row);
        self.row.extend_from_slice(&transition.state.continuous);
        transition.stats.write_diagnostics(&mut self.row);
        self.diagnostic_writer.write_values(&self.row)?;
        Ok(())
    }

    /// Record the step size that sampling will use.
    pub fn write_adapt_finish(&mut self, step_size: f64) -> Result<()> {
        self.sample_writer.write_message("Adaptation terminated")?;
        self.sample_writer
            .write_message(&format!("Step size = {}", step_size))?;
        self.sample_writer
            .write_message("No free parameters for unit metric")?;
        Ok(())
    }

    pub fn write_timing<L: Logger + ?Sized>(
        &mut self,
        warmup: Duration,
        sampling: Duration,
        logger: &mut L,
    ) -> Result<()> {
        let warmup = warmup.as_secs_f64();
        let sampling = sampling.as_secs_f64();
        let lines = [
            format!("Elapsed Time: {} seconds (Warm-up)", warmup),
            format!("              {} seconds (Sampling)", sampling),
            format!("              {} seconds (Total)", warmup + sampling),
        ];

        write_block(&mut *self.sample_writer, &lines)?;
        write_block(&mut *self.diagnostic_writer, &lines)?;

        logger.info("");
        for line in lines.iter() {
            logger.info(line);
        }
        logger.info("");
        Ok(())
    }
}

/// A blank separated block of messages.
fn write_block<W: Writer + ?Sized>(writer: &mut W, lines: &[String]) -> std::io::Result<()> {
    writer.write_blank()?;
    for line in lines {
        writer.write_message(line)?;
    }
    writer.write_blank()
}
