// This file is part of mii-emu.
// Copyright (c) 2020-2024 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::thread;

use cpal::traits::{DeviceTrait, EventLoopTrait, HostTrait};

use mii_core::audio::{AudioDriver, AudioSink, AUDIO_FREQ};

/// Host audio output. The cpal event loop runs on its own thread and
/// pulls mixed blocks from the sink in its data callback.
pub struct CpalDriver {
    sink: Arc<AudioSink>,
}

impl CpalDriver {
    pub fn build(sink: Arc<AudioSink>) -> Result<CpalDriver, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| "no audio output device".to_string())?;
        let format = cpal::Format {
            channels: 2,
            sample_rate: cpal::SampleRate(AUDIO_FREQ),
            data_type: cpal::SampleFormat::F32,
        };
        let event_loop = host.event_loop();
        let stream_id = event_loop
            .build_output_stream(&device, &format)
            .map_err(|error| format!("{}", error))?;
        event_loop
            .play_stream(stream_id)
            .map_err(|error| format!("{}", error))?;
        info!(target: "audio", "Opened {:?} output stream", format.data_type);
        let callback_sink = sink.clone();
        thread::Builder::new()
            .name("audio".to_string())
            .spawn(move || {
                event_loop.run(move |_stream_id, stream_result| {
                    let stream_data = match stream_result {
                        Ok(data) => data,
                        Err(error) => {
                            warn!(target: "audio", "stream error: {}", error);
                            return;
                        }
                    };
                    if let cpal::StreamData::Output {
                        buffer: cpal::UnknownTypeOutputBuffer::F32(mut buffer),
                    } = stream_data
                    {
                        callback_sink.mix(&mut buffer);
                    }
                });
            })
            .map_err(|error| format!("{}", error))?;
        Ok(CpalDriver { sink })
    }
}

impl AudioDriver for CpalDriver {
    fn start(&mut self) {
        self.sink.set_muted(false);
    }

    fn stop(&mut self) {
        self.sink.set_muted(true);
    }
}
