//! # Frame Codec
//!
//! Archivos de audio pre-codificados: una secuencia de registros
//! `[longitud u16 little-endian][paquete opus]`, sin cabecera ni magic number.
//!
//! - [`PacketWriter`] consume PCM crudo (s16le, mono, 48 kHz), lo corta en
//!   frames fijos de 20 ms, codifica cada frame con un [`FrameEncoder`] y
//!   escribe un registro por frame.
//! - [`PacketReader`] lee los registros en orden y devuelve la longitud de
//!   cada paquete, o `0` al final limpio del stream.
//!
//! El encoder es opaco: el motor solo se ocupa del framing.

use bytes::BytesMut;
use std::path::Path;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
};
use tracing::debug;

/// Muestras por frame (20 ms @ 48 kHz)
pub const FRAME_SAMPLES: usize = songbird::constants::MONO_FRAME_SIZE;
pub const CHANNELS: usize = 1;
pub const SAMPLE_BYTES: usize = std::mem::size_of::<i16>();
/// Tamaño en bytes de un frame PCM completo
pub const FRAME_BYTES: usize = FRAME_SAMPLES * CHANNELS * SAMPLE_BYTES;
/// Máximo tamaño de paquete aceptado (límite recomendado por libopus)
pub const MAX_PACKET_LEN: usize = 4000;

const PREFIX_LEN: usize = std::mem::size_of::<u16>();

// Validación única del tamaño del buffer frente a los anchos enteros usados.
const _: () = {
    assert!(songbird::constants::SAMPLE_RATE_RAW == 48_000);
    assert!(FRAME_SAMPLES == 960);
    assert!(FRAME_BYTES == 1920);
    assert!(FRAME_BYTES <= i32::MAX as usize);
    assert!(MAX_PACKET_LEN <= u16::MAX as usize);
    assert!(usize::BITS >= 32);
};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prefijo de longitud fuera de rango; solo invalida la lectura actual
    #[error("invalid packet length: {0}")]
    InvalidLength(u16),

    #[error("encoder error: {0}")]
    Encode(String),
}

/// Codificador de un frame PCM a un paquete comprimido
pub trait FrameEncoder: Send {
    /// Codifica exactamente [`FRAME_SAMPLES`] muestras y devuelve los bytes escritos en `out`
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError>;
}

/// Encoder opus real (mono, 48 kHz)
pub struct OpusFrameEncoder {
    encoder: audiopus::coder::Encoder,
}

impl OpusFrameEncoder {
    pub fn new(bitrate: u32) -> Result<Self, CodecError> {
        let mut encoder = audiopus::coder::Encoder::new(
            audiopus::SampleRate::Hz48000,
            audiopus::Channels::Mono,
            audiopus::Application::Audio,
        )
        .map_err(opus_error)?;

        let bitrate = i32::try_from(bitrate)
            .map_err(|_| CodecError::Encode(format!("bitrate fuera de rango: {}", bitrate)))?;
        encoder
            .set_bitrate(audiopus::Bitrate::BitsPerSecond(bitrate))
            .map_err(opus_error)?;

        Ok(Self { encoder })
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
        self.encoder.encode(pcm, out).map_err(opus_error)
    }
}

fn opus_error(e: audiopus::Error) -> CodecError {
    CodecError::Encode(format!("{:?}", e))
}

/// Lector secuencial de registros con prefijo de longitud
pub struct PacketReader<R> {
    inner: R,
    packets: u64,
}

impl PacketReader<BufReader<File>> {
    /// Abre un archivo de frames del disco
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, packets: 0 }
    }

    /// Lee el siguiente paquete y lo agrega al final de `buf`.
    ///
    /// Devuelve la longitud del paquete, o `0` cuando el stream terminó. Un
    /// registro final truncado también cuenta como final limpio. Una longitud
    /// inválida devuelve [`CodecError::InvalidLength`] sin cerrar el lector.
    pub async fn read_packet(&mut self, buf: &mut BytesMut) -> Result<usize, CodecError> {
        let mut prefix = [0u8; PREFIX_LEN];
        if !self.fill(&mut prefix).await? {
            return Ok(0);
        }

        let len = u16::from_le_bytes(prefix);
        if len == 0 || usize::from(len) > MAX_PACKET_LEN {
            return Err(CodecError::InvalidLength(len));
        }

        let start = buf.len();
        buf.resize(start + usize::from(len), 0);
        if !self.fill(&mut buf[start..]).await? {
            buf.truncate(start);
            return Ok(0);
        }

        self.packets += 1;
        Ok(usize::from(len))
    }

    /// Paquetes completos leídos hasta ahora
    pub fn packets_read(&self) -> u64 {
        self.packets
    }

    /// Llena `dst` por completo; `false` si el stream terminó antes
    async fn fill(&mut self, dst: &mut [u8]) -> Result<bool, CodecError> {
        let mut filled = 0;
        while filled < dst.len() {
            let n = self.inner.read(&mut dst[filled..]).await?;
            if n == 0 {
                if filled > 0 {
                    debug!(
                        "Registro truncado tras {} paquetes ({} de {} bytes), fin de stream",
                        self.packets,
                        filled,
                        dst.len()
                    );
                }
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }
}

/// Escritor de frames: PCM de tamaño fijo dentro, registros de longitud variable fuera
pub struct PacketWriter<W, E> {
    inner: W,
    encoder: E,
    pending: Vec<u8>,
    samples: Vec<i16>,
    packet: Vec<u8>,
    frames: u64,
}

impl<W: AsyncWrite + Unpin, E: FrameEncoder> PacketWriter<W, E> {
    pub fn new(inner: W, encoder: E) -> Self {
        Self {
            inner,
            encoder,
            pending: Vec::with_capacity(FRAME_BYTES),
            samples: vec![0; FRAME_SAMPLES],
            packet: vec![0; MAX_PACKET_LEN],
            frames: 0,
        }
    }

    /// Agrega bytes PCM; cada frame completo se codifica y escribe de inmediato
    pub async fn write_pcm(&mut self, mut data: &[u8]) -> Result<(), CodecError> {
        while !data.is_empty() {
            let take = (FRAME_BYTES - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == FRAME_BYTES {
                self.emit_frame().await?;
            }
        }
        Ok(())
    }

    /// Emite el frame parcial pendiente (rellenado con ceros) y vacía el destino.
    ///
    /// Sin este flush el último frame incompleto se pierde.
    pub async fn flush(&mut self) -> Result<(), CodecError> {
        if !self.pending.is_empty() {
            debug!(
                "Rellenando frame final con {} bytes de silencio",
                FRAME_BYTES - self.pending.len()
            );
            self.emit_frame().await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Frames escritos hasta ahora
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    async fn emit_frame(&mut self) -> Result<(), CodecError> {
        self.pending.resize(FRAME_BYTES, 0);
        for (sample, bytes) in self
            .samples
            .iter_mut()
            .zip(self.pending.chunks_exact(SAMPLE_BYTES))
        {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let len = self.encoder.encode(&self.samples, &mut self.packet)?;
        if len == 0 || len > MAX_PACKET_LEN {
            return Err(CodecError::Encode(format!(
                "el encoder devolvió un paquete de {} bytes",
                len
            )));
        }

        // len <= MAX_PACKET_LEN, cabe en u16
        self.inner.write_all(&(len as u16).to_le_bytes()).await?;
        self.inner.write_all(&self.packet[..len]).await?;

        self.pending.clear();
        self.frames += 1;
        Ok(())
    }
}

/// Codifica un stream PCM completo y devuelve la cantidad de frames escritos
pub async fn encode_pcm_stream<R, W, E>(mut reader: R, writer: W, encoder: E) -> Result<u64, CodecError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    E: FrameEncoder,
{
    let mut packets = PacketWriter::new(writer, encoder);
    let mut chunk = vec![0u8; FRAME_BYTES * 4];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        packets.write_pcm(&chunk[..n]).await?;
    }

    packets.flush().await?;
    Ok(packets.frames())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// Encoder determinista: paquete de largo variable con el número de frame
    #[derive(Default, Clone)]
    struct FakeEncoder {
        seen: Arc<Mutex<Vec<Vec<i16>>>>,
    }

    impl FrameEncoder for FakeEncoder {
        fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
            let mut seen = self.seen.lock();
            let frame = seen.len();
            seen.push(pcm.to_vec());
            let len = 1 + frame % 5;
            out[..len].fill(frame as u8);
            Ok(len)
        }
    }

    /// Archivo de frames con `count` paquetes; el paquete `i` es `[i; 1 + i % 5]`
    fn framed_bytes(count: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..count {
            let len = 1 + i % 5;
            out.extend_from_slice(&(len as u16).to_le_bytes());
            out.extend(std::iter::repeat(i as u8).take(len));
        }
        out
    }

    fn pcm_frame(value: i16) -> Vec<u8> {
        std::iter::repeat(value.to_le_bytes())
            .take(FRAME_SAMPLES)
            .flatten()
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_with_padded_tail() {
        let encoder = FakeEncoder::default();
        let mut writer = PacketWriter::new(Vec::new(), encoder.clone());

        let mut pcm = Vec::new();
        for value in 1..=3 {
            pcm.extend(pcm_frame(value));
        }
        // Medio frame al final
        pcm.extend(&pcm_frame(7)[..FRAME_BYTES / 2]);

        // Escritura en trozos que no coinciden con el tamaño de frame
        for chunk in pcm.chunks(777) {
            writer.write_pcm(chunk).await.unwrap();
        }
        assert_eq!(writer.frames(), 3);
        writer.flush().await.unwrap();
        assert_eq!(writer.frames(), 4);

        let seen = encoder.seen.lock().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen[1].iter().all(|&s| s == 2));
        assert!(seen[3][..FRAME_SAMPLES / 2].iter().all(|&s| s == 7));
        assert!(seen[3][FRAME_SAMPLES / 2..].iter().all(|&s| s == 0));

        let bytes = writer.into_inner();
        assert_eq!(bytes, framed_bytes(4));

        let mut reader = PacketReader::new(bytes.as_slice());
        let mut lengths = Vec::new();
        loop {
            let mut buf = BytesMut::new();
            let n = reader.read_packet(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            assert_eq!(buf.len(), n);
            lengths.push(n);
        }
        assert_eq!(lengths, vec![1, 2, 3, 4]);
        assert_eq!(reader.packets_read(), 4);

        // Leer más allá del final sigue siendo fin limpio
        let mut buf = BytesMut::new();
        assert_eq!(reader.read_packet(&mut buf).await.unwrap(), 0);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_flush_without_pending_writes_nothing() {
        let mut writer = PacketWriter::new(Vec::new(), FakeEncoder::default());
        writer.write_pcm(&pcm_frame(1)).await.unwrap();
        writer.flush().await.unwrap();
        writer.flush().await.unwrap();
        assert_eq!(writer.frames(), 1);
        assert_eq!(writer.into_inner(), framed_bytes(1));
    }

    #[tokio::test]
    async fn test_truncated_final_record_is_end_of_stream() {
        let mut bytes = framed_bytes(2);
        // Prefijo que promete 10 bytes con solo 3 disponibles
        bytes.extend_from_slice(&10u16.to_le_bytes());
        bytes.extend_from_slice(&[9, 9, 9]);

        let mut reader = PacketReader::new(bytes.as_slice());
        let mut buf = BytesMut::new();
        assert_eq!(reader.read_packet(&mut buf).await.unwrap(), 1);
        assert_eq!(reader.read_packet(&mut buf).await.unwrap(), 2);
        assert_eq!(reader.read_packet(&mut buf).await.unwrap(), 0);
        assert_eq!(&buf[..], &[0, 1, 1]);

        // Prefijo a medias
        let mut reader = PacketReader::new(&[5u8][..]);
        assert_eq!(reader.read_packet(&mut BytesMut::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_length_fails_only_current_read() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(b"abc");
        bytes.extend_from_slice(&(MAX_PACKET_LEN as u16 + 1).to_le_bytes());

        let mut reader = PacketReader::new(bytes.as_slice());
        let mut buf = BytesMut::new();

        assert!(matches!(
            reader.read_packet(&mut buf).await,
            Err(CodecError::InvalidLength(0))
        ));
        assert_eq!(reader.read_packet(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..], b"abc");
        assert!(matches!(
            reader.read_packet(&mut buf).await,
            Err(CodecError::InvalidLength(len)) if usize::from(len) == MAX_PACKET_LEN + 1
        ));
        assert_eq!(reader.read_packet(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_encode_pcm_stream_counts_frames() {
        let mut pcm = pcm_frame(3);
        pcm.extend(pcm_frame(4));
        pcm.extend([1, 0, 1]);

        let mut out = Vec::new();
        let frames = encode_pcm_stream(pcm.as_slice(), &mut out, FakeEncoder::default())
            .await
            .unwrap();
        assert_eq!(frames, 3);
        assert_eq!(out, framed_bytes(3));
    }

    #[tokio::test]
    async fn test_opus_encoder_produces_packets() {
        let encoder = OpusFrameEncoder::new(64_000).unwrap();
        let pcm: Vec<u8> = (0..FRAME_SAMPLES * 2)
            .flat_map(|i| (((i as f32 * 0.05).sin() * 8000.0) as i16).to_le_bytes())
            .collect();

        let mut out = Vec::new();
        let frames = encode_pcm_stream(pcm.as_slice(), &mut out, encoder).await.unwrap();
        assert_eq!(frames, 2);

        let mut reader = PacketReader::new(out.as_slice());
        let mut buf = BytesMut::new();
        assert!(reader.read_packet(&mut buf).await.unwrap() > 0);
        assert!(reader.read_packet(&mut buf).await.unwrap() > 0);
        assert_eq!(reader.read_packet(&mut buf).await.unwrap(), 0);
    }
}
