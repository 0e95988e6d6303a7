use pbcompiler_backend::*;

fn main() -> Result<(), TimingValidationError> {
    let params = RamseyHahnDdParams::default();
    let result = params.compile(&RamseyHahnDdOverrides {
        free_precession_time: Some(3e-6),
        n_refocussing_pi_pulses: Some(1),
    })?;
    let program = PulseProgram::build(&result.plan);

    for iv in result.plan.intervals() {
        println!("{iv}");
    }
    println!("{} instructions:", program.instructions().len());
    for instr in program.instructions() {
        println!("  {instr}");
    }
    println!("clock cycles per cycle: {}", program.clock_cycle_count());
    println!("{:?}", program.calc_levels(24));
    Ok(())
}
