use std::thread;

use anyhow::Result;
use realfft::num_complex::Complex;

use binconv::table::{
    Ear, ImpulseResponseTable, IrMetadata, MeasurementKey, RawImpulseResponse, VirtualSpeaker,
};
use binconv::upc::EnvironmentConvolver;

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK_LEN: usize = 64;
const IR_LEN: usize = 256;

const SPEAKERS: [VirtualSpeaker; 6] = [
    VirtualSpeaker::North,
    VirtualSpeaker::South,
    VirtualSpeaker::East,
    VirtualSpeaker::West,
    VirtualSpeaker::Zenith,
    VirtualSpeaker::Nadir,
];

fn decaying(len: usize, gain: f32) -> RawImpulseResponse {
    let taps = (0..len)
        .map(|n| gain * (-(n as f32) / 32.0).exp())
        .collect::<Vec<_>>();
    RawImpulseResponse::new(taps)
}

fn load_table(block_len: usize) -> Result<ImpulseResponseTable> {
    let mut table = ImpulseResponseTable::builder()
        .with_sample_rate(SAMPLE_RATE)
        .with_block_len(block_len)
        .build()?;

    table.begin_setup_with(&IrMetadata {
        sample_rate: SAMPLE_RATE,
        ir_len: IR_LEN,
        distance: Some(1.95),
    })?;

    for azimuth in (0..360).step_by(15) {
        for ear in [Ear::Left, Ear::Right] {
            let gain = match ear {
                Ear::Left => 1.0,
                Ear::Right => 0.5,
            };
            table.add(
                MeasurementKey::direction(azimuth as f32, 0.0, ear),
                decaying(IR_LEN, gain).with_delay(azimuth / 15),
            )?;
        }
    }

    for speaker in SPEAKERS {
        for ear in [Ear::Left, Ear::Right] {
            table.add(MeasurementKey::speaker(speaker, ear), decaying(IR_LEN, 0.25))?;
        }
    }

    table.end_setup()?;

    Ok(table)
}

#[cfg(feature = "render")]
mod render {
    use super::*;
    use binconv::render::Renderer;
    use binconv::table::Direction;
    use binconv::Error;

    #[test]
    fn renderer_processes_published_table() -> Result<()> {
        let table = load_table(BLOCK_LEN)?;
        let mut renderer = Renderer::builder(table.reader()).build()?;

        let input = vec![0.5f32; 4 * BLOCK_LEN];
        let mut left = vec![0.0f32; input.len()];
        let mut right = vec![0.0f32; input.len()];

        for azimuth in [0.0, 15.0, 30.0, 45.0] {
            renderer.process_block(&input, Direction::new(azimuth, 0.0), &mut left, &mut right)?;
        }

        assert!(left.iter().any(|&x| x != 0.0), "expected non-zero output");
        assert!(right.iter().any(|&x| x != 0.0), "expected non-zero output");

        let energy = |buf: &[f32]| buf.iter().map(|x| x * x).sum::<f32>();
        assert!(energy(&left) > energy(&right));

        Ok(())
    }

    #[test]
    fn renderer_follows_block_len_change() -> Result<()> {
        const NEW_BLOCK_LEN: usize = 128;

        let mut table = load_table(BLOCK_LEN)?;
        let mut renderer = Renderer::builder(table.reader()).build()?;

        let input = vec![0.5f32; BLOCK_LEN];
        let mut left = vec![0.0f32; BLOCK_LEN];
        let mut right = vec![0.0f32; BLOCK_LEN];
        renderer.process_block(&input, Direction::new(90.0, 0.0), &mut left, &mut right)?;

        table.set_block_len(NEW_BLOCK_LEN)?;
        assert!(renderer.refresh()?);
        assert_eq!(renderer.block_len(), Some(NEW_BLOCK_LEN));

        let result =
            renderer.process_block(&input, Direction::new(90.0, 0.0), &mut left, &mut right);
        assert!(matches!(result, Err(Error::InvalidInputOutputLen(64, 128))));

        let input = vec![0.5f32; NEW_BLOCK_LEN];
        let mut left = vec![0.0f32; NEW_BLOCK_LEN];
        let mut right = vec![0.0f32; NEW_BLOCK_LEN];
        renderer.process_block(&input, Direction::new(90.0, 0.0), &mut left, &mut right)?;

        assert!(left.iter().any(|&x| x != 0.0), "expected non-zero output");

        Ok(())
    }
}

#[test]
fn room_channels_share_one_inverse_transform() -> Result<()> {
    let table = load_table(BLOCK_LEN)?;
    let snapshot = table.reader().load().ok_or(binconv::Error::NotReady)?;

    let mut channels = SPEAKERS
        .iter()
        .map(|_| -> Result<EnvironmentConvolver> {
            let mut convolver = EnvironmentConvolver::new();
            convolver.setup(
                snapshot.block_len(),
                snapshot.fft_len(),
                snapshot.subfilter_count(),
            )?;
            Ok(convolver)
        })
        .collect::<Result<Vec<_>>>()?;

    let input = vec![0.5f32; BLOCK_LEN];
    let mut spectrum = vec![Complex::new(0.0f32, 0.0); BLOCK_LEN + 1];
    let mut sum = spectrum.clone();
    let mut output = vec![0.0f32; BLOCK_LEN];

    for _ in 0..8 {
        sum.fill(Complex::new(0.0, 0.0));

        for (convolver, speaker) in Iterator::zip(channels.iter_mut(), SPEAKERS.iter()) {
            let ir = snapshot.lookup(&MeasurementKey::speaker(*speaker, Ear::Left));
            convolver.process_spectrum(&input, ir, &mut spectrum, BLOCK_LEN)?;

            for (acc, bin) in Iterator::zip(sum.iter_mut(), spectrum.iter()) {
                *acc += bin;
            }
        }

        channels[0].inverse(&mut sum, &mut output)?;
    }

    assert!(output.iter().any(|&x| x != 0.0), "expected non-zero output");

    Ok(())
}

#[test]
fn readers_never_see_partial_tables() -> Result<()> {
    let mut table = load_table(BLOCK_LEN)?;
    let reader = table.reader();

    let handle = thread::spawn(move || {
        let mut seen = 0;
        for _ in 0..2000 {
            if let Some(snapshot) = reader.load() {
                assert_eq!(snapshot.len(), 24 * 2 + SPEAKERS.len() * 2);
                assert_eq!(snapshot.subfilter_count() * snapshot.block_len(), IR_LEN);
                seen += 1;
            }
        }
        seen
    });

    for block_len in [128, 32, 64, 256, 64] {
        table.set_block_len(block_len)?;
    }

    let seen = handle.join().map_err(|_| anyhow::anyhow!("reader panicked"))?;
    assert!(seen <= 2000);
    assert_eq!(table.generation(), 6);

    Ok(())
}
