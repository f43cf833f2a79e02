//! diff — контейнер артефакта диффа (CSDIFF01).
//!
//! Один артефакт = заголовок + по одной секции на том. Секция хранит поток
//! backend send для этого тома как есть.
//!
//! Формат (LE):
//!   header (36 B): [magic8="CSDIFF01"][version u32][flags u32][from u64][to u64][sections u32]
//!   section:       [name_len u16][name][payload_len u64][crc32 u32][payload]
//!
//! flags bit0 = incremental (from значим). Для полного экспорта from = 0.
//!
//! Запись: длина и CRC секции заранее неизвестны (поток идёт из backend), поэтому
//! пишется заглушка, а в end_section позиция патчится через Seek. Число секций
//! патчится в finish.
//!
//! Чтение: verify() проходит весь файл и сверяет CRC до того, как что-либо
//! отдаётся backend'у, так что порченый артефакт не оставляет полупринятых томов.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Read, Seek, SeekFrom, Take, Write};

use crate::consts::{
    DIFF_FLAG_INCREMENTAL, DIFF_HDR_SIZE, DIFF_MAGIC, DIFF_SECTION_TAIL_SIZE, DIFF_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffHeader {
    pub incremental: bool,
    pub from: u64,
    pub to: u64,
    pub sections: u32,
}

impl DiffHeader {
    pub fn incremental(from: u64, to: u64) -> Self {
        Self {
            incremental: true,
            from,
            to,
            sections: 0,
        }
    }

    pub fn full(id: u64) -> Self {
        Self {
            incremental: false,
            from: 0,
            to: id,
            sections: 0,
        }
    }

    pub fn encode(&self) -> [u8; DIFF_HDR_SIZE] {
        let mut b = [0u8; DIFF_HDR_SIZE];
        b[0..8].copy_from_slice(DIFF_MAGIC);
        LittleEndian::write_u32(&mut b[8..12], DIFF_VERSION);
        let flags = if self.incremental {
            DIFF_FLAG_INCREMENTAL
        } else {
            0
        };
        LittleEndian::write_u32(&mut b[12..16], flags);
        LittleEndian::write_u64(&mut b[16..24], self.from);
        LittleEndian::write_u64(&mut b[24..32], self.to);
        LittleEndian::write_u32(&mut b[32..36], self.sections);
        b
    }

    pub fn decode(b: &[u8; DIFF_HDR_SIZE]) -> io::Result<Self> {
        if &b[0..8] != DIFF_MAGIC {
            return Err(invalid("bad diff artifact magic"));
        }
        let version = LittleEndian::read_u32(&b[8..12]);
        if version != DIFF_VERSION {
            return Err(invalid(&format!(
                "unsupported diff artifact version {}",
                version
            )));
        }
        let flags = LittleEndian::read_u32(&b[12..16]);
        Ok(Self {
            incremental: flags & DIFF_FLAG_INCREMENTAL != 0,
            from: LittleEndian::read_u64(&b[16..24]),
            to: LittleEndian::read_u64(&b[24..32]),
            sections: LittleEndian::read_u32(&b[32..36]),
        })
    }
}

struct OpenSection {
    tail_pos: u64,
    len: u64,
    crc: Hasher,
}

/// Пишущая сторона. Пока секция открыта, `Write` пишет в её payload.
pub struct DiffWriter<W: Write + Seek> {
    inner: W,
    sections: u32,
    open: Option<OpenSection>,
}

impl<W: Write + Seek> DiffWriter<W> {
    /// Записать заголовок (sections = 0, будет пропатчен в finish).
    pub fn new(mut inner: W, header: &DiffHeader) -> io::Result<Self> {
        let mut h = *header;
        h.sections = 0;
        inner.write_all(&h.encode())?;
        Ok(Self {
            inner,
            sections: 0,
            open: None,
        })
    }

    pub fn begin_section(&mut self, name: &str) -> io::Result<()> {
        if self.open.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "previous section is still open",
            ));
        }
        let name_len = u16::try_from(name.len()).map_err(|_| invalid("section name too long"))?;
        self.inner.write_u16::<LittleEndian>(name_len)?;
        self.inner.write_all(name.as_bytes())?;
        let tail_pos = self.inner.stream_position()?;
        self.inner.write_all(&[0u8; DIFF_SECTION_TAIL_SIZE])?;
        self.open = Some(OpenSection {
            tail_pos,
            len: 0,
            crc: Hasher::new(),
        });
        Ok(())
    }

    /// Закрыть секцию: пропатчить payload_len и crc32.
    pub fn end_section(&mut self) -> io::Result<()> {
        let open = self.open.take().ok_or_else(no_open_section)?;
        let mut tail = [0u8; DIFF_SECTION_TAIL_SIZE];
        LittleEndian::write_u64(&mut tail[0..8], open.len);
        LittleEndian::write_u32(&mut tail[8..12], open.crc.finalize());
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(open.tail_pos))?;
        self.inner.write_all(&tail)?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.sections += 1;
        Ok(())
    }

    /// Пропатчить число секций, сбросить буферы и вернуть writer.
    pub fn finish(mut self) -> io::Result<W> {
        if self.open.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "section left open at finish",
            ));
        }
        let end = self.inner.stream_position()?;
        self.inner.seek(SeekFrom::Start(32))?;
        self.inner.write_u32::<LittleEndian>(self.sections)?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for DiffWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let open = self.open.as_mut().ok_or_else(no_open_section)?;
        let n = self.inner.write(buf)?;
        open.crc.update(&buf[..n]);
        open.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Метаданные секции.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub name: String,
    pub len: u64,
    pub crc32: u32,
}

/// Читающая сторона.
pub struct DiffReader<R: Read + Seek> {
    inner: R,
    header: DiffHeader,
    next_pos: u64,
    read_sections: u32,
}

impl<R: Read + Seek> DiffReader<R> {
    pub fn open(mut inner: R) -> io::Result<Self> {
        let mut b = [0u8; DIFF_HDR_SIZE];
        inner.read_exact(&mut b)?;
        let header = DiffHeader::decode(&b)?;
        Ok(Self {
            inner,
            header,
            next_pos: DIFF_HDR_SIZE as u64,
            read_sections: 0,
        })
    }

    pub fn header(&self) -> &DiffHeader {
        &self.header
    }

    /// Пройти все секции и сверить CRC. Возвращает их описания.
    /// Позиция чтения после вызова не меняется.
    pub fn verify(&mut self) -> io::Result<Vec<SectionInfo>> {
        // число секций приходит от пира: сверяем с размером файла до любых аллокаций
        let end = self.inner.seek(SeekFrom::End(0))?;
        let min_section = (2 + DIFF_SECTION_TAIL_SIZE) as u64;
        let room = end.saturating_sub(DIFF_HDR_SIZE as u64) / min_section;
        if u64::from(self.header.sections) > room {
            return Err(invalid(&format!(
                "{} sections declared, file of {} bytes holds at most {}",
                self.header.sections, end, room
            )));
        }
        let mut out = Vec::new();
        let mut pos = DIFF_HDR_SIZE as u64;
        for _ in 0..self.header.sections {
            self.inner.seek(SeekFrom::Start(pos))?;
            let info = read_section_head(&mut self.inner)?;
            let mut h = Hasher::new();
            let mut body = (&mut self.inner).take(info.len);
            let mut buf = [0u8; 64 * 1024];
            let mut got = 0u64;
            loop {
                let n = body.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                h.update(&buf[..n]);
                got += n as u64;
            }
            if got != info.len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "section '{}' truncated: {} of {} bytes",
                        info.name, got, info.len
                    ),
                ));
            }
            if h.finalize() != info.crc32 {
                return Err(invalid(&format!("section '{}' CRC mismatch", info.name)));
            }
            pos = self.inner.stream_position()?;
            out.push(info);
        }
        if end != pos {
            return Err(invalid(&format!(
                "{} trailing bytes after last section",
                end - pos
            )));
        }
        Ok(out)
    }

    /// Следующая секция: описание + ограниченный reader по её payload.
    /// Непрочитанный остаток предыдущей секции пропускается.
    pub fn next_section(&mut self) -> io::Result<Option<(SectionInfo, Take<&mut R>)>> {
        if self.read_sections >= self.header.sections {
            return Ok(None);
        }
        self.inner.seek(SeekFrom::Start(self.next_pos))?;
        let info = read_section_head(&mut self.inner)?;
        let body_pos = self.inner.stream_position()?;
        self.next_pos = body_pos + info.len;
        self.read_sections += 1;
        let len = info.len;
        Ok(Some((info, (&mut self.inner).take(len))))
    }
}

fn read_section_head<R: Read>(r: &mut R) -> io::Result<SectionInfo> {
    let name_len = r.read_u16::<LittleEndian>()? as usize;
    let mut name = vec![0u8; name_len];
    r.read_exact(&mut name)?;
    let name = String::from_utf8(name).map_err(|_| invalid("non UTF-8 section name"))?;
    let len = r.read_u64::<LittleEndian>()?;
    let crc32 = r.read_u32::<LittleEndian>()?;
    Ok(SectionInfo { name, len, crc32 })
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn no_open_section() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "no open section")
}
